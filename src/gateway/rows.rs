//! Row cursor over query results.
//!
//! A cursor is either streaming (fed by a producer task that owns a pooled
//! connection) or buffered (rows read eagerly, used inside transactions).
//! Cursors are single-reader: advancing and scanning take `&mut self`/`&self`
//! on one owner.

use crate::error::{ErrorKind, GatewayResult};
use crate::models::{FromSqlValue, SqlValue};
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::debug;

/// One decoded result row.
#[derive(Debug, Clone, PartialEq)]
pub struct Row {
    columns: Arc<[String]>,
    values: Vec<SqlValue>,
}

impl Row {
    pub fn new(columns: Arc<[String]>, values: Vec<SqlValue>) -> Self {
        Self { columns, values }
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn values(&self) -> &[SqlValue] {
        &self.values
    }

    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }

    /// Scan column `index` into a typed destination.
    pub fn get<T: FromSqlValue>(&self, index: usize) -> GatewayResult<T> {
        let value = self.values.get(index).ok_or_else(|| {
            ErrorKind::Failed.new(format!(
                "Column index {} out of bounds (len: {})",
                index,
                self.values.len()
            ))
        })?;
        T::from_sql_value(value)
    }

    /// Scan the column called `name` into a typed destination.
    pub fn get_by_name<T: FromSqlValue>(&self, name: &str) -> GatewayResult<T> {
        let index = self
            .columns
            .iter()
            .position(|c| c == name)
            .ok_or_else(|| ErrorKind::Failed.new(format!("Column not found: {}", name)))?;
        self.get(index)
    }

    /// Render the row as a JSON object keyed by column name.
    pub fn to_json_map(&self) -> serde_json::Map<String, serde_json::Value> {
        self.columns
            .iter()
            .zip(&self.values)
            .map(|(name, value)| (name.clone(), value.to_json()))
            .collect()
    }
}

/// Conversion from a whole row into typed destinations.
///
/// Implemented for tuples of [`FromSqlValue`] types, scanned positionally.
pub trait FromRow: Sized {
    fn from_row(row: &Row) -> GatewayResult<Self>;
}

impl FromRow for Row {
    fn from_row(row: &Row) -> GatewayResult<Self> {
        Ok(row.clone())
    }
}

macro_rules! impl_from_row_tuple {
    ($len:expr => $($ty:ident : $idx:tt),+) => {
        impl<$($ty: FromSqlValue),+> FromRow for ($($ty,)+) {
            fn from_row(row: &Row) -> GatewayResult<Self> {
                if row.len() != $len {
                    return Err(ErrorKind::Failed.new(format!(
                        "Expected {} destination arguments in scan, row has {} columns",
                        $len,
                        row.len()
                    )));
                }
                Ok(($(row.get::<$ty>($idx)?,)+))
            }
        }
    };
}

impl_from_row_tuple!(1 => A: 0);
impl_from_row_tuple!(2 => A: 0, B: 1);
impl_from_row_tuple!(3 => A: 0, B: 1, C: 2);
impl_from_row_tuple!(4 => A: 0, B: 1, C: 2, D: 3);
impl_from_row_tuple!(5 => A: 0, B: 1, C: 2, D: 3, E: 4);
impl_from_row_tuple!(6 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5);
impl_from_row_tuple!(7 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6);
impl_from_row_tuple!(8 => A: 0, B: 1, C: 2, D: 3, E: 4, F: 5, G: 6, H: 7);

enum RowSource {
    Buffered(VecDeque<Row>),
    Streaming {
        receiver: mpsc::Receiver<GatewayResult<Row>>,
        task: JoinHandle<()>,
        /// First row, read while opening the cursor
        pending: Option<Row>,
    },
}

/// Stateful iterator over a result set.
pub struct RowCursor {
    source: RowSource,
    current: Option<Row>,
    columns: Option<Arc<[String]>>,
    closed: bool,
}

impl RowCursor {
    /// Cursor over rows that are already in memory.
    pub fn buffered(rows: Vec<Row>) -> Self {
        let columns = rows.first().map(|r| Arc::clone(&r.columns));
        Self {
            source: RowSource::Buffered(rows.into()),
            current: None,
            columns,
            closed: false,
        }
    }

    /// Cursor fed by a producer task.
    ///
    /// Waits for the first message so that statement errors surface here
    /// rather than on the first `next()`.
    pub(crate) async fn streaming(
        mut receiver: mpsc::Receiver<GatewayResult<Row>>,
        task: JoinHandle<()>,
    ) -> GatewayResult<Self> {
        match receiver.recv().await {
            Some(Ok(row)) => Ok(Self {
                columns: Some(Arc::clone(&row.columns)),
                source: RowSource::Streaming {
                    receiver,
                    task,
                    pending: Some(row),
                },
                current: None,
                closed: false,
            }),
            Some(Err(err)) => {
                task.abort();
                Err(err)
            }
            // Producer finished without rows
            None => Ok(Self::buffered(Vec::new())),
        }
    }

    /// Advance to the next row. Returns `false` once the rows are exhausted
    /// or the cursor is closed.
    pub async fn next(&mut self) -> GatewayResult<bool> {
        if self.closed {
            self.current = None;
            return Ok(false);
        }

        let next = match &mut self.source {
            RowSource::Buffered(rows) => rows.pop_front().map(Ok),
            RowSource::Streaming {
                receiver, pending, ..
            } => match pending.take() {
                Some(row) => Some(Ok(row)),
                None => receiver.recv().await,
            },
        };

        match next {
            Some(Ok(row)) => {
                if self.columns.is_none() {
                    self.columns = Some(Arc::clone(&row.columns));
                }
                self.current = Some(row);
                Ok(true)
            }
            Some(Err(err)) => {
                self.close();
                Err(err)
            }
            None => {
                self.close();
                Ok(false)
            }
        }
    }

    /// The row the cursor is positioned on.
    pub fn row(&self) -> Option<&Row> {
        self.current.as_ref()
    }

    /// Scan the current row into typed destinations.
    pub fn scan<T: FromRow>(&self) -> GatewayResult<T> {
        let row = self
            .current
            .as_ref()
            .ok_or_else(|| ErrorKind::Failed.new("Scan called without a current row"))?;
        T::from_row(row)
    }

    /// Column names, once at least one row has been seen.
    pub fn columns(&self) -> &[String] {
        self.columns.as_deref().unwrap_or(&[])
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Release the cursor's resources. Safe to call more than once.
    ///
    /// A streaming cursor stops its producer, which returns the connection to
    /// the pool.
    pub fn close(&mut self) {
        if self.closed {
            return;
        }
        self.closed = true;
        match &mut self.source {
            RowSource::Buffered(rows) => rows.clear(),
            RowSource::Streaming {
                receiver,
                task,
                pending,
            } => {
                pending.take();
                receiver.close();
                task.abort();
                debug!("Row cursor closed");
            }
        }
    }

    /// Drain the remaining rows.
    pub async fn collect_rows(mut self) -> GatewayResult<Vec<Row>> {
        let mut rows = Vec::new();
        while self.next().await? {
            if let Some(row) = self.current.take() {
                rows.push(row);
            }
        }
        Ok(rows)
    }

    /// Drain the remaining rows, scanning each into `T`.
    pub async fn scan_all<T: FromRow>(mut self) -> GatewayResult<Vec<T>> {
        let mut out = Vec::new();
        while self.next().await? {
            out.push(self.scan::<T>()?);
        }
        Ok(out)
    }
}

impl Drop for RowCursor {
    fn drop(&mut self) {
        if let RowSource::Streaming { task, .. } = &self.source {
            task.abort();
        }
    }
}

impl std::fmt::Debug for RowCursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let kind = match &self.source {
            RowSource::Buffered(_) => "buffered",
            RowSource::Streaming { .. } => "streaming",
        };
        f.debug_struct("RowCursor")
            .field("source", &kind)
            .field("columns", &self.columns())
            .field("closed", &self.closed)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(id: i64, name: &str) -> Row {
        let columns: Arc<[String]> = vec!["id".to_string(), "name".to_string()].into();
        Row::new(columns, vec![SqlValue::Int(id), SqlValue::Text(name.to_string())])
    }

    #[tokio::test]
    async fn test_buffered_cursor_iterates_and_scans() {
        let mut cursor = RowCursor::buffered(vec![row(1, "a"), row(2, "b")]);
        assert_eq!(cursor.columns(), ["id".to_string(), "name".to_string()]);

        assert!(cursor.next().await.unwrap());
        let (id, name): (i64, String) = cursor.scan().unwrap();
        assert_eq!((id, name.as_str()), (1, "a"));

        assert!(cursor.next().await.unwrap());
        assert_eq!(cursor.row().unwrap().get_by_name::<String>("name").unwrap(), "b");

        assert!(!cursor.next().await.unwrap());
        assert!(cursor.is_closed());
    }

    #[tokio::test]
    async fn test_scan_undecodable_column_into_option_fails() {
        let columns: Arc<[String]> = vec!["id".to_string(), "span".to_string()].into();
        let undecodable = Row::new(
            columns,
            vec![
                SqlValue::Int(1),
                SqlValue::Unsupported {
                    type_name: "INTERVAL".to_string(),
                },
            ],
        );
        let mut cursor = RowCursor::buffered(vec![undecodable]);
        assert!(cursor.next().await.unwrap());

        let err = cursor.scan::<(i64, Option<String>)>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
        let (_, raw): (i64, SqlValue) = cursor.scan().unwrap();
        assert!(matches!(raw, SqlValue::Unsupported { .. }));
    }

    #[tokio::test]
    async fn test_scan_without_next_fails() {
        let cursor = RowCursor::buffered(vec![row(1, "a")]);
        let err = cursor.scan::<(i64, String)>().unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Failed);
    }

    #[tokio::test]
    async fn test_scan_arity_mismatch() {
        let mut cursor = RowCursor::buffered(vec![row(1, "a")]);
        assert!(cursor.next().await.unwrap());
        assert!(cursor.scan::<(i64,)>().is_err());
        assert!(cursor.scan::<(i64, String, String)>().is_err());
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let mut cursor = RowCursor::buffered(vec![row(1, "a"), row(2, "b")]);
        cursor.close();
        cursor.close();
        assert!(!cursor.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_streaming_cursor_reads_all_rows() {
        let (sender, receiver) = mpsc::channel(2);
        let task = tokio::spawn(async move {
            for i in 0..5 {
                if sender.send(Ok(row(i, "s"))).await.is_err() {
                    break;
                }
            }
        });
        let cursor = RowCursor::streaming(receiver, task).await.unwrap();
        let ids: Vec<(i64, String)> = cursor.scan_all().await.unwrap();
        assert_eq!(ids.iter().map(|(id, _)| *id).collect::<Vec<_>>(), vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn test_streaming_cursor_first_error_surfaces() {
        let (sender, receiver) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let _ = sender.send(Err(ErrorKind::Failed.new("syntax error"))).await;
        });
        let err = RowCursor::streaming(receiver, task).await.unwrap_err();
        assert_eq!(err.to_string(), "syntax error");
    }

    #[tokio::test]
    async fn test_streaming_cursor_mid_stream_error() {
        let (sender, receiver) = mpsc::channel(4);
        let task = tokio::spawn(async move {
            let _ = sender.send(Ok(row(1, "a"))).await;
            let _ = sender.send(Err(ErrorKind::Failed.new("connection lost"))).await;
        });
        let mut cursor = RowCursor::streaming(receiver, task).await.unwrap();
        assert!(cursor.next().await.unwrap());
        assert!(cursor.next().await.is_err());
        assert!(cursor.is_closed());
        assert!(!cursor.next().await.unwrap());
    }

    #[tokio::test]
    async fn test_streaming_cursor_empty() {
        let (sender, receiver) = mpsc::channel::<GatewayResult<Row>>(1);
        let task = tokio::spawn(async move {
            drop(sender);
        });
        let mut cursor = RowCursor::streaming(receiver, task).await.unwrap();
        assert!(!cursor.next().await.unwrap());
        assert!(cursor.columns().is_empty());
    }

    #[tokio::test]
    async fn test_close_stops_producer() {
        let (sender, receiver) = mpsc::channel(1);
        let task = tokio::spawn(async move {
            let mut i = 0;
            while sender.send(Ok(row(i, "x"))).await.is_ok() {
                i += 1;
            }
        });
        let mut cursor = RowCursor::streaming(receiver, task).await.unwrap();
        assert!(cursor.next().await.unwrap());
        cursor.close();
        assert!(!cursor.next().await.unwrap());
    }

    #[test]
    fn test_row_to_json_map() {
        let map = row(9, "z").to_json_map();
        assert_eq!(map["id"], serde_json::json!(9));
        assert_eq!(map["name"], serde_json::json!("z"));
    }
}
