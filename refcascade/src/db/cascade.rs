use std::collections::{HashMap, HashSet};

use tracing::trace;

use crate::catalog::{Catalog, ColId, ConstraintId, ForeignKeyMeta, TableId, TableMeta};
use crate::errors::sql_err;
use crate::storage::{Row, RowId, RowPointer, Table};
use crate::txn::VisibilityContext;
use crate::types::{ReferentialAction, Value, format_key};

use super::coerce::column_default;
use super::constraints::{
    build_fk_parent_key, build_referenced_parent_key, check_row_constraints, find_child_rows,
    find_parent_row,
};
use super::merge::ChangeSet;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum CascadeMode {
    /// Read only: find violations, collect pending updates and every reached
    /// row for the conflict check.
    Validate,
    /// Rebuild the delete set and pending updates that APPLY will write.
    Apply,
}

/// Constraints already followed on the current descent. Every frame owns
/// its own snapshot, so sibling branches never see each other's entries.
#[derive(Clone, Debug, Default)]
pub(crate) struct PathSet(Vec<ConstraintId>);

impl PathSet {
    pub(crate) fn contains(&self, id: ConstraintId) -> bool {
        self.0.contains(&id)
    }

    pub(crate) fn with(&self, id: ConstraintId) -> Self {
        let mut ids = self.0.clone();
        ids.push(id);
        Self(ids)
    }
}

struct DeleteFrame {
    table: TableId,
    row_id: RowId,
    row: Row,
    path: PathSet,
    depth: usize,
    expanded: bool,
    // whether popping the expanded frame records the delete
    record: bool,
}

struct UpdateFrame {
    table: TableId,
    row_id: RowId,
    old: Row,
    new: Row,
    changed: Vec<ColId>,
    // parent table whose key change produced this image; its MAIN side is
    // known to match
    origin: Option<TableId>,
    path: PathSet,
    depth: usize,
}

enum Frame {
    Delete(DeleteFrame),
    Update(UpdateFrame),
}

/// A SET NULL or SET DEFAULT rewrite found while expanding a delete. Resolved
/// once every delete of the walk is known, so a row the walk also deletes is
/// never rewritten.
struct DeferredSet<'a> {
    fk: &'a ForeignKeyMeta,
    child_meta: &'a TableMeta,
    child_id: RowId,
    child_row: Row,
    parent_table: TableId,
    path: PathSet,
    depth: usize,
}

/// Worklist walk of the foreign key graph for one statement. Storage is
/// only read; every decision lands in the `ChangeSet`.
pub(crate) struct Cascade<'a, 'v> {
    catalog: &'a Catalog,
    tables: &'a HashMap<TableId, Table>,
    visibility: &'a VisibilityContext<'v>,
    mode: CascadeMode,
    max_depth: usize,
    changes: &'a mut ChangeSet,
    // rows the statement itself deletes
    removed: &'a HashSet<RowPointer>,
    expanded: HashSet<RowPointer>,
    // latest image of every row an update frame rewrote
    rewritten: HashMap<RowPointer, Row>,
}

impl<'a, 'v> Cascade<'a, 'v> {
    pub(crate) fn new(
        catalog: &'a Catalog,
        tables: &'a HashMap<TableId, Table>,
        visibility: &'a VisibilityContext<'v>,
        mode: CascadeMode,
        max_depth: usize,
        changes: &'a mut ChangeSet,
        removed: &'a HashSet<RowPointer>,
    ) -> Self {
        Self {
            catalog,
            tables,
            visibility,
            mode,
            max_depth,
            changes,
            removed,
            expanded: HashSet::new(),
            rewritten: HashMap::new(),
        }
    }

    /// Walks everything deleting `rows` implies. The rows themselves are not
    /// added to the delete set; the statement deletes them.
    pub(crate) fn check_cascade_delete(
        &mut self,
        table: TableId,
        rows: &[(RowId, Row)],
    ) -> anyhow::Result<()> {
        let frames = rows
            .iter()
            .rev()
            .map(|(row_id, row)| {
                Frame::Delete(DeleteFrame {
                    table,
                    row_id: *row_id,
                    row: row.clone(),
                    path: PathSet::default(),
                    depth: 0,
                    expanded: false,
                    record: false,
                })
            })
            .collect();
        self.run(frames)
    }

    /// Walks everything rewriting `old` into `new` implies, for the columns
    /// in `changed`.
    pub(crate) fn check_cascade_update(
        &mut self,
        table: TableId,
        row_id: RowId,
        old: &Row,
        new: &Row,
        changed: &[ColId],
    ) -> anyhow::Result<()> {
        self.run(vec![Frame::Update(UpdateFrame {
            table,
            row_id,
            old: old.clone(),
            new: new.clone(),
            changed: changed.to_vec(),
            origin: None,
            path: PathSet::default(),
            depth: 0,
        })])
    }

    /// Expands every delete frame first, then the rewrites those deletes
    /// deferred, then the update frames the rewrites produce.
    fn run(&mut self, mut stack: Vec<Frame>) -> anyhow::Result<()> {
        let mut deferred = Vec::new();
        loop {
            while let Some(frame) = stack.pop() {
                match frame {
                    Frame::Delete(frame) if frame.expanded => {
                        if frame.record {
                            self.changes.record_delete(
                                RowPointer::new(frame.table, frame.row_id),
                                frame.row,
                            );
                        }
                    }
                    Frame::Delete(frame) => self.expand_delete(frame, &mut stack, &mut deferred)?,
                    Frame::Update(frame) => self.expand_update(frame, &mut stack)?,
                }
            }
            if deferred.is_empty() {
                return Ok(());
            }
            let mut updates = Vec::with_capacity(deferred.len());
            for set in deferred.drain(..) {
                if let Some(frame) = self.resolve_set(set)? {
                    updates.push(Frame::Update(frame));
                }
            }
            stack.extend(updates.into_iter().rev());
        }
    }

    fn meta(&self, table: TableId) -> anyhow::Result<&'a TableMeta> {
        self.catalog
            .get_table_by_id(table)
            .ok_or_else(|| sql_err("XX000", format!("unknown table id {table}")))
    }

    fn check_depth(&self, depth: usize, table: &TableMeta) -> anyhow::Result<()> {
        if depth > self.max_depth {
            return Err(sql_err(
                "54001",
                format!(
                    "cascade depth limit {} exceeded at table {}",
                    self.max_depth, table.name
                ),
            ));
        }
        Ok(())
    }

    fn is_gone(&self, row: RowPointer) -> bool {
        self.removed.contains(&row) || self.changes.is_doomed(row)
    }

    /// Whether a parent row still carries `key` once this statement's
    /// deletes and key rewrites are taken into account.
    fn has_main_ref(&self, fk: &ForeignKeyMeta, key: &[Value]) -> anyhow::Result<bool> {
        if let Some((row_id, row)) = find_parent_row(self.tables, fk, key, self.visibility)? {
            let parent = RowPointer::new(fk.referenced_table, row_id);
            if !self.is_gone(parent)
                && build_referenced_parent_key(self.image_of(parent, &row), fk).as_deref()
                    == Some(key)
            {
                return Ok(true);
            }
        }
        // a row this statement rekeys onto `key`
        Ok(self.rewritten.iter().any(|(parent, image)| {
            parent.table_id == fk.referenced_table
                && !self.is_gone(*parent)
                && build_referenced_parent_key(self.image_of(*parent, image), fk).as_deref()
                    == Some(key)
        }))
    }

    /// Image `row` will have after the statement's pending rewrites.
    fn image_of<'r>(&'r self, row: RowPointer, stored: &'r Row) -> &'r Row {
        self.changes
            .pending(row)
            .map(|pending| &pending.new)
            .or_else(|| self.rewritten.get(&row))
            .unwrap_or(stored)
    }

    /// Registers the new image of a row the statement itself rewrites, so
    /// references to its new key resolve before its frame is walked.
    pub(crate) fn note_rewrite(&mut self, table: TableId, row_id: RowId, new: &Row) {
        self.rewritten
            .insert(RowPointer::new(table, row_id), new.clone());
    }

    /// The child's image with the foreign key columns rewritten, based on
    /// whatever an earlier path already registered for it.
    fn child_image(
        &self,
        fk: &ForeignKeyMeta,
        child: &TableMeta,
        child_id: RowId,
        child_row: &Row,
        action: ReferentialAction,
        parent_new: Option<&Row>,
    ) -> Row {
        let mut image = self
            .changes
            .pending(RowPointer::new(fk.table, child_id))
            .map(|pending| pending.new.clone())
            .unwrap_or_else(|| child_row.clone());
        for (pos, col) in fk.local_columns.iter().enumerate() {
            image[*col] = match (action, parent_new) {
                (ReferentialAction::SetDefault, _) => column_default(child, *col),
                (ReferentialAction::Cascade, Some(parent)) => {
                    parent[fk.referenced_columns[pos]].clone()
                }
                _ => Value::Null,
            };
        }
        image
    }

    fn expand_delete(
        &mut self,
        mut frame: DeleteFrame,
        stack: &mut Vec<Frame>,
        deferred: &mut Vec<DeferredSet<'a>>,
    ) -> anyhow::Result<()> {
        let ptr = RowPointer::new(frame.table, frame.row_id);
        if !self.expanded.insert(ptr) {
            // another copy of this row was expanded first
            if frame.record {
                self.changes.record_delete(ptr, frame.row);
            }
            return Ok(());
        }
        let meta = self.meta(frame.table)?;
        trace!(
            table = %meta.name,
            row = frame.row_id,
            depth = frame.depth,
            "cascade delete frame"
        );
        let catalog = self.catalog;
        let mut children = Vec::new();
        for fk in catalog.main_constraints(frame.table) {
            let Some(key) = build_referenced_parent_key(&frame.row, fk) else {
                continue;
            };
            let rows = find_child_rows(self.tables, fk, &key, self.visibility)?;
            if rows.is_empty() {
                continue;
            }
            let child_meta = self.meta(fk.table)?;
            match fk.on_delete {
                action if action.blocks() => {
                    let blocking = rows.iter().find(|(child_id, _)| {
                        let child = RowPointer::new(fk.table, *child_id);
                        child != ptr && !self.removed.contains(&child)
                    });
                    if blocking.is_some() {
                        return Err(sql_err(
                            "23503",
                            format!(
                                "update or delete on table {} violates foreign key constraint {} on table {}: key {} is still referenced",
                                meta.name,
                                fk.name,
                                fk.table_name,
                                format_key(&key)
                            ),
                        ));
                    }
                }
                ReferentialAction::Cascade => {
                    for (child_id, child_row) in rows {
                        let child = RowPointer::new(fk.table, child_id);
                        if child == ptr || self.removed.contains(&child) {
                            continue;
                        }
                        // both modes doom the row so later rewrites skip it;
                        // only apply records the delete
                        let record = self.changes.doom(child) && self.mode == CascadeMode::Apply;
                        if self.expanded.contains(&child) {
                            if record {
                                self.changes.record_delete(child, child_row);
                            }
                            continue;
                        }
                        // rows are expanded at most once, which bounds data
                        // cycles; the path only feeds update frames
                        let path = if fk.is_self_referencing() || frame.path.contains(fk.id) {
                            frame.path.clone()
                        } else {
                            frame.path.with(fk.id)
                        };
                        self.check_depth(frame.depth + 1, child_meta)?;
                        children.push(Frame::Delete(DeleteFrame {
                            table: fk.table,
                            row_id: child_id,
                            row: child_row,
                            path,
                            depth: frame.depth + 1,
                            expanded: false,
                            record,
                        }));
                    }
                }
                _ => {
                    for (child_id, child_row) in rows {
                        if self.is_gone(RowPointer::new(fk.table, child_id)) {
                            continue;
                        }
                        deferred.push(DeferredSet {
                            fk,
                            child_meta,
                            child_id,
                            child_row,
                            parent_table: frame.table,
                            path: frame.path.clone(),
                            depth: frame.depth,
                        });
                    }
                }
            }
        }
        frame.expanded = true;
        stack.push(Frame::Delete(frame));
        // reversed so children are expanded in the order they were found
        stack.extend(children.into_iter().rev());
        Ok(())
    }

    /// Registers the rewritten image of a deferred SET NULL / SET DEFAULT
    /// child and returns the update frame that re-checks it, if any.
    fn resolve_set(&mut self, set: DeferredSet<'a>) -> anyhow::Result<Option<UpdateFrame>> {
        let DeferredSet {
            fk,
            child_meta,
            child_id,
            child_row,
            parent_table,
            path,
            depth,
        } = set;
        if self.is_gone(RowPointer::new(fk.table, child_id)) {
            return Ok(None);
        }
        let image = self.child_image(fk, child_meta, child_id, &child_row, fk.on_delete, None);
        let merged = self.changes.merge_update(
            child_meta,
            child_id,
            &child_row,
            &image,
            &fk.local_columns,
        )?;
        if path.contains(fk.id) {
            return Ok(None);
        }
        self.check_depth(depth + 1, child_meta)?;
        Ok(Some(UpdateFrame {
            table: fk.table,
            row_id: child_id,
            old: child_row,
            new: merged,
            changed: fk.local_columns.clone(),
            origin: (fk.on_delete == ReferentialAction::SetNull).then_some(parent_table),
            path: path.with(fk.id),
            depth: depth + 1,
        }))
    }

    fn expand_update(&mut self, frame: UpdateFrame, stack: &mut Vec<Frame>) -> anyhow::Result<()> {
        let meta = self.meta(frame.table)?;
        trace!(
            table = %meta.name,
            row = frame.row_id,
            depth = frame.depth,
            changed = ?frame.changed,
            "cascade update frame"
        );
        check_row_constraints(meta, &frame.new)?;
        self.rewritten
            .insert(RowPointer::new(frame.table, frame.row_id), frame.new.clone());
        for fk in &meta.foreign_keys {
            if !fk.touches_local(&frame.changed) || frame.origin == Some(fk.referenced_table) {
                continue;
            }
            let Some(key) = build_fk_parent_key(&frame.new, fk) else {
                continue;
            };
            // a row may reference itself
            if fk.is_self_referencing()
                && build_referenced_parent_key(&frame.new, fk).as_deref() == Some(key.as_slice())
            {
                continue;
            }
            if !self.has_main_ref(fk, &key)? {
                return Err(sql_err(
                    "23503",
                    format!(
                        "insert or update on table {} violates foreign key constraint {}: key {} is not present in table {}",
                        meta.name,
                        fk.name,
                        format_key(&key),
                        fk.referenced_table_name
                    ),
                ));
            }
        }
        let mut children = Vec::new();
        for fk in self.catalog.main_constraints(frame.table) {
            if !fk.touches_referenced(&frame.changed) {
                continue;
            }
            let unchanged = fk
                .referenced_columns
                .iter()
                .all(|col| frame.old[*col] == frame.new[*col]);
            if unchanged {
                continue;
            }
            let Some(key) = build_referenced_parent_key(&frame.old, fk) else {
                continue;
            };
            let rows = find_child_rows(self.tables, fk, &key, self.visibility)?;
            let child_meta = self.meta(fk.table)?;
            for (child_id, child_row) in rows {
                let child = RowPointer::new(fk.table, child_id);
                if self.is_gone(child) {
                    continue;
                }
                if fk.on_update.blocks() {
                    return Err(sql_err(
                        "23503",
                        format!(
                            "update or delete on table {} violates foreign key constraint {} on table {}: key {} is still referenced",
                            meta.name,
                            fk.name,
                            fk.table_name,
                            format_key(&key)
                        ),
                    ));
                }
                if self.mode == CascadeMode::Validate {
                    self.changes.reach(child);
                }
                let image = self.child_image(
                    fk,
                    child_meta,
                    child_id,
                    &child_row,
                    fk.on_update,
                    Some(&frame.new),
                );
                let merged = self.changes.merge_update(
                    child_meta,
                    child_id,
                    &child_row,
                    &image,
                    &fk.local_columns,
                )?;
                if frame.path.contains(fk.id) {
                    continue;
                }
                self.check_depth(frame.depth + 1, child_meta)?;
                children.push(Frame::Update(UpdateFrame {
                    table: fk.table,
                    row_id: child_id,
                    old: child_row,
                    new: merged,
                    changed: fk.local_columns.clone(),
                    origin: (fk.on_update != ReferentialAction::SetDefault)
                        .then_some(frame.table),
                    path: frame.path.with(fk.id),
                    depth: frame.depth + 1,
                }));
            }
        }
        stack.extend(children.into_iter().rev());
        Ok(())
    }
}
