//! Database-fed message source.
//!
//! Some sites stage inbound HL7 in a table instead of sending it over a socket. The poller
//! reads pending rows through [`SqlExecutor`], runs each through the [`Engine`] and records
//! the reply code against the row.

use crate::collaborators::SqlExecutor;
use crate::pipeline::Engine;
use crate::EngineResult;
use serde_json::Value;
use std::sync::Arc;

/// Default statement selecting unprocessed messages, oldest first.
pub const SELECT_PENDING: &str =
    "SELECT TOP (@limit) Id, Body FROM InboundMessages WHERE Processed = 0 ORDER BY Id";

/// Default statement marking a message processed.
pub const MARK_PROCESSED: &str =
    "UPDATE InboundMessages SET Processed = 1, ReplyCode = @code, Reply = @reply WHERE Id = @id";

pub const DEFAULT_BATCH_SIZE: u64 = 50;

/// Counts from one polling pass.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct PollSummary {
    pub acknowledged: usize,
    pub refused: usize,
}

impl PollSummary {
    pub fn processed(&self) -> usize {
        self.acknowledged + self.refused
    }
}

pub struct MessagePoller {
    executor: Arc<dyn SqlExecutor>,
    engine: Arc<Engine>,
    select: String,
    mark: String,
    batch_size: u64,
}

impl MessagePoller {
    pub fn new(executor: Arc<dyn SqlExecutor>, engine: Arc<Engine>) -> Self {
        Self {
            executor,
            engine,
            select: SELECT_PENDING.into(),
            mark: MARK_PROCESSED.into(),
            batch_size: DEFAULT_BATCH_SIZE,
        }
    }

    /// Replaces both statements. They must take the same named parameters as the defaults.
    pub fn with_statements(mut self, select: impl Into<String>, mark: impl Into<String>) -> Self {
        self.select = select.into();
        self.mark = mark.into();
        self
    }

    pub fn with_batch_size(mut self, batch_size: u64) -> Self {
        self.batch_size = batch_size.max(1);
        self
    }

    /// Processes one batch of pending messages.
    ///
    /// Each message gets exactly one reply, which is written back with its row. A message is
    /// marked processed whether it was acknowledged or refused.
    ///
    /// # Errors
    /// Returns the first database failure. Rows handled before it keep their marks.
    pub fn poll_once(&self) -> EngineResult<PollSummary> {
        let pending = self
            .executor
            .execute(&self.select, &[("limit", Value::from(self.batch_size))])
            .map_err(|e| {
                tracing::error!(error = %e, "could not read pending messages");
                e
            })?;

        let mut summary = PollSummary::default();
        for row in 0..pending.len() {
            let id = pending.cell(row, "Id").cloned().unwrap_or(Value::Null);
            let reply = self.engine.handle(&pending.text(row, "Body"));

            if reply.is_ack() {
                summary.acknowledged += 1;
            } else {
                summary.refused += 1;
            }

            self.executor
                .execute(
                    &self.mark,
                    &[
                        ("code", Value::from(reply.code.as_str())),
                        ("reply", Value::from(reply.readable.as_str())),
                        ("id", id.clone()),
                    ],
                )
                .map_err(|e| {
                    tracing::error!(id = %id, error = %e, "could not mark message processed");
                    e
                })?;
            tracing::debug!(id = %id, code = %reply.code, "marked message processed");
        }

        if summary.processed() > 0 {
            tracing::info!(
                acknowledged = summary.acknowledged,
                refused = summary.refused,
                "polling pass complete"
            );
        }
        Ok(summary)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::collaborators::Table;
    use crate::config::CoreConfig;
    use crate::fixtures::{order_message, ScriptedGateway};
    use crate::EngineError;
    use serde_json::json;
    use std::sync::Mutex;

    #[derive(Default)]
    struct FakeDatabase {
        pending: Table,
        fail_marks: bool,
        calls: Mutex<Vec<(String, Vec<(String, Value)>)>>,
    }

    impl SqlExecutor for FakeDatabase {
        fn execute(&self, statement: &str, params: &[(&str, Value)]) -> EngineResult<Table> {
            self.calls.lock().expect("lock").push((
                statement.to_string(),
                params.iter().map(|(k, v)| (k.to_string(), v.clone())).collect(),
            ));
            if statement.starts_with("SELECT") {
                Ok(self.pending.clone())
            } else if self.fail_marks {
                Err(EngineError::Database("deadlock".into()))
            } else {
                Ok(Table::default())
            }
        }
    }

    fn pending(bodies: &[(i64, String)]) -> Table {
        Table {
            columns: vec!["Id".into(), "Body".into()],
            rows: bodies.iter().map(|(id, body)| vec![json!(id), json!(body)]).collect(),
        }
    }

    fn engine() -> Arc<Engine> {
        Arc::new(Engine::new(
            Arc::new(CoreConfig::default()),
            Arc::new(ScriptedGateway::default()),
        ))
    }

    #[test]
    fn every_row_is_marked_with_its_reply_code() {
        let database = Arc::new(FakeDatabase {
            pending: pending(&[(1, order_message("C1", "NW")), (2, "garbage".into())]),
            ..FakeDatabase::default()
        });
        let summary = MessagePoller::new(database.clone(), engine())
            .with_batch_size(10)
            .poll_once()
            .expect("polls");

        assert_eq!(summary, PollSummary { acknowledged: 1, refused: 1 });

        let calls = database.calls.lock().expect("lock");
        assert_eq!(calls.len(), 3);
        assert_eq!(calls[0].1, vec![("limit".to_string(), json!(10))]);
        assert_eq!(calls[1].1[0], ("code".to_string(), json!("AA")));
        assert_eq!(calls[1].1[2], ("id".to_string(), json!(1)));
        assert_eq!(calls[2].1[0], ("code".to_string(), json!("AP")));
        assert_eq!(calls[2].1[2], ("id".to_string(), json!(2)));
    }

    #[test]
    fn empty_batch_does_nothing() {
        let database = Arc::new(FakeDatabase::default());
        let summary = MessagePoller::new(database.clone(), engine())
            .poll_once()
            .expect("polls");
        assert_eq!(summary.processed(), 0);
        assert_eq!(database.calls.lock().expect("lock").len(), 1);
    }

    #[test]
    fn mark_failure_propagates() {
        let database = Arc::new(FakeDatabase {
            pending: pending(&[(1, order_message("C1", "NW"))]),
            fail_marks: true,
            ..FakeDatabase::default()
        });
        let err = MessagePoller::new(database, engine())
            .poll_once()
            .expect_err("mark fails");
        assert!(matches!(err, EngineError::Database(_)));
    }

    #[test]
    fn custom_statements_are_used() {
        let database = Arc::new(FakeDatabase::default());
        MessagePoller::new(database.clone(), engine())
            .with_statements("SELECT * FROM Queue", "UPDATE Queue")
            .poll_once()
            .expect("polls");
        assert_eq!(database.calls.lock().expect("lock")[0].0, "SELECT * FROM Queue");
    }
}
