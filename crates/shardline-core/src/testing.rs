//! Scripted physical connections shared by unit tests.

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use parking_lot::Mutex;
use shardline_error::{Result, ShardError};
use shardline_types::{IsolationLevel, ShardValue};

use crate::datasource::{GeneratedKeys, PhysicalConnection, ResultSet, SharedConnection};

pub(crate) type CallLog = Arc<Mutex<Vec<String>>>;

pub(crate) struct ScriptedConn {
    name: String,
    log: CallLog,
    delay: Duration,
    fail: bool,
}

impl ScriptedConn {
    fn run(&self, sql: &str) -> Result<()> {
        if !self.delay.is_zero() {
            thread::sleep(self.delay);
        }
        self.log.lock().push(format!("{}:{sql}", self.name));
        if self.fail {
            Err(ShardError::physical(&self.name, "scripted failure"))
        } else {
            Ok(())
        }
    }
}

impl PhysicalConnection for ScriptedConn {
    fn query(&mut self, sql: &str, _parameters: &[ShardValue]) -> Result<ResultSet> {
        self.run(sql)?;
        Ok(ResultSet::new(
            vec!["source".to_owned()],
            vec![vec![ShardValue::Text(self.name.clone())]],
        ))
    }

    fn update(
        &mut self,
        sql: &str,
        _parameters: &[ShardValue],
        _keys: &GeneratedKeys,
    ) -> Result<u64> {
        self.run(sql)?;
        Ok(2)
    }

    fn execute(&mut self, sql: &str, _parameters: &[ShardValue]) -> Result<bool> {
        self.run(sql)?;
        Ok(sql.trim_start().to_ascii_uppercase().starts_with("SELECT"))
    }

    fn execute_batch(&mut self, sql: &str, parameter_sets: &[Vec<ShardValue>]) -> Result<Vec<u64>> {
        self.run(sql)?;
        Ok(vec![1; parameter_sets.len()])
    }

    fn set_auto_commit(&mut self, _auto_commit: bool) -> Result<()> {
        Ok(())
    }

    fn set_read_only(&mut self, _read_only: bool) -> Result<()> {
        Ok(())
    }

    fn set_transaction_isolation(&mut self, _level: IsolationLevel) -> Result<()> {
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        Ok(())
    }

    fn close(&mut self) -> Result<()> {
        Ok(())
    }
}

pub(crate) fn scripted(name: &str, log: &CallLog, delay: Duration, fail: bool) -> SharedConnection {
    let conn: Box<dyn PhysicalConnection> = Box::new(ScriptedConn {
        name: name.to_owned(),
        log: Arc::clone(log),
        delay,
        fail,
    });
    Arc::new(Mutex::new(conn))
}
