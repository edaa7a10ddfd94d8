use crate::storage::{Row, RowId, Table, VersionedRow};
use crate::txn::VisibilityContext;

pub(crate) fn select_visible_version_idx(
    versions: &[VersionedRow],
    visibility: &VisibilityContext,
) -> Option<usize> {
    versions
        .iter()
        .enumerate()
        .rev()
        .find(|(_, version)| visibility.is_visible(version))
        .map(|(idx, _)| idx)
}

pub(crate) fn select_visible_version<'a>(
    versions: &'a [VersionedRow],
    visibility: &VisibilityContext,
) -> Option<&'a VersionedRow> {
    select_visible_version_idx(versions, visibility).map(|idx| &versions[idx])
}

pub(crate) fn visible_row_clone(
    table: &Table,
    row_id: RowId,
    visibility: &VisibilityContext,
) -> Option<Row> {
    table
        .rows_by_id
        .get(&row_id)
        .and_then(|versions| select_visible_version(versions, visibility))
        .map(|version| version.data.clone())
}

pub(crate) fn visible_rows(table: &Table, visibility: &VisibilityContext) -> Vec<(RowId, Row)> {
    table
        .scan_all()
        .filter_map(|(row_id, versions)| {
            select_visible_version(versions, visibility).map(|v| (*row_id, v.data.clone()))
        })
        .collect()
}
