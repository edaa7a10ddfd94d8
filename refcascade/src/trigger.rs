use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::catalog::TableId;
use crate::storage::Row;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum TriggerEvent {
    InsertAfter,
    UpdateAfter,
    DeleteAfter,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TriggerLevel {
    Row,
    Statement,
}

/// The rows a trigger sees. Delete firings carry only `old_rows`, insert
/// firings only `new_rows`; update firings carry both, pairwise aligned.
#[derive(Debug)]
pub struct TriggerFiring<'a> {
    pub trigger: &'a str,
    pub table: &'a str,
    pub event: TriggerEvent,
    pub old_rows: &'a [Row],
    pub new_rows: &'a [Row],
}

/// Trigger body. Runs while the statement still holds the database, so it
/// must not call back into the engine.
pub trait TriggerAction: Send + Sync {
    fn fire(&self, firing: &TriggerFiring<'_>) -> anyhow::Result<()>;
}

impl<F> TriggerAction for F
where
    F: Fn(&TriggerFiring<'_>) -> anyhow::Result<()> + Send + Sync,
{
    fn fire(&self, firing: &TriggerFiring<'_>) -> anyhow::Result<()> {
        self(firing)
    }
}

struct RegisteredTrigger {
    name: String,
    level: TriggerLevel,
    action: Arc<dyn TriggerAction>,
}

#[derive(Default)]
pub(crate) struct TriggerRegistry {
    by_table: HashMap<(TableId, TriggerEvent), Vec<RegisteredTrigger>>,
}

impl fmt::Debug for TriggerRegistry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names: Vec<&str> = self
            .by_table
            .values()
            .flat_map(|triggers| triggers.iter().map(|t| t.name.as_str()))
            .collect();
        names.sort_unstable();
        f.debug_struct("TriggerRegistry")
            .field("triggers", &names)
            .finish()
    }
}

impl TriggerRegistry {
    pub(crate) fn register(
        &mut self,
        table: TableId,
        name: String,
        event: TriggerEvent,
        level: TriggerLevel,
        action: Arc<dyn TriggerAction>,
    ) {
        self.by_table
            .entry((table, event))
            .or_default()
            .push(RegisteredTrigger {
                name,
                level,
                action,
            });
    }

    pub(crate) fn contains(&self, table: TableId, name: &str) -> bool {
        self.by_table
            .iter()
            .filter(|((tid, _), _)| *tid == table)
            .any(|(_, triggers)| triggers.iter().any(|t| t.name == name))
    }

    fn fire(&self, pending: &PendingFiring) -> anyhow::Result<()> {
        let Some(triggers) = self.by_table.get(&(pending.table_id, pending.event)) else {
            return Ok(());
        };
        for trigger in triggers {
            match trigger.level {
                TriggerLevel::Statement => {
                    tracing::trace!(
                        trigger = %trigger.name,
                        table = %pending.table,
                        rows = pending.len(),
                        "firing statement trigger"
                    );
                    trigger.action.fire(&TriggerFiring {
                        trigger: &trigger.name,
                        table: &pending.table,
                        event: pending.event,
                        old_rows: &pending.old_rows,
                        new_rows: &pending.new_rows,
                    })?;
                }
                TriggerLevel::Row => {
                    for idx in 0..pending.len() {
                        let old_rows = pending.old_rows.get(idx..=idx).unwrap_or(&[]);
                        let new_rows = pending.new_rows.get(idx..=idx).unwrap_or(&[]);
                        trigger.action.fire(&TriggerFiring {
                            trigger: &trigger.name,
                            table: &pending.table,
                            event: pending.event,
                            old_rows,
                            new_rows,
                        })?;
                    }
                }
            }
        }
        Ok(())
    }
}

struct PendingFiring {
    table_id: TableId,
    table: String,
    event: TriggerEvent,
    old_rows: Vec<Row>,
    new_rows: Vec<Row>,
}

impl PendingFiring {
    fn len(&self) -> usize {
        self.old_rows.len().max(self.new_rows.len())
    }
}

/// Row changes queued during APPLY, fired together in the TRIGGER phase.
/// One entry per (table, event), in first-queued order.
#[derive(Default)]
pub(crate) struct TriggerBatch {
    entries: Vec<PendingFiring>,
}

impl TriggerBatch {
    fn entry(&mut self, table_id: TableId, table: &str, event: TriggerEvent) -> &mut PendingFiring {
        let pos = match self
            .entries
            .iter()
            .position(|e| e.table_id == table_id && e.event == event)
        {
            Some(pos) => pos,
            None => {
                self.entries.push(PendingFiring {
                    table_id,
                    table: table.to_string(),
                    event,
                    old_rows: Vec::new(),
                    new_rows: Vec::new(),
                });
                self.entries.len() - 1
            }
        };
        &mut self.entries[pos]
    }

    pub(crate) fn deleted(&mut self, table_id: TableId, table: &str, row: Row) {
        self.entry(table_id, table, TriggerEvent::DeleteAfter)
            .old_rows
            .push(row);
    }

    pub(crate) fn updated(&mut self, table_id: TableId, table: &str, old: Row, new: Row) {
        let entry = self.entry(table_id, table, TriggerEvent::UpdateAfter);
        entry.old_rows.push(old);
        entry.new_rows.push(new);
    }

    pub(crate) fn inserted(&mut self, table_id: TableId, table: &str, row: Row) {
        self.entry(table_id, table, TriggerEvent::InsertAfter)
            .new_rows
            .push(row);
    }

    pub(crate) fn fire_all(&self, registry: &TriggerRegistry) -> anyhow::Result<()> {
        for pending in &self.entries {
            registry.fire(pending)?;
        }
        Ok(())
    }
}
