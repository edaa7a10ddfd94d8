mod common;

use std::collections::BTreeSet;

use common::{int, int_col};
use proptest::prelude::*;
use refcascade::ReferentialAction::{self, Cascade, NoAction, SetNull};
use refcascade::{ForeignKeySpec, RowUpdate, TableSpec, Value};

fn create_employees(ctx: &common::TestCtx, on_delete: ReferentialAction, on_update: ReferentialAction) {
    ctx.engine
        .create_table(
            TableSpec::new("employees")
                .column(int_col("id"))
                .column(int_col("manager_id"))
                .primary_key(&["id"])
                .foreign_key(
                    ForeignKeySpec::new(&["manager_id"], "employees")
                        .on_delete(on_delete)
                        .on_update(on_update),
                ),
        )
        .expect("create employees");
}

/// 1 <- 2 <- ... <- len, each employee managed by the previous one.
async fn insert_chain(ctx: &common::TestCtx, len: i64) {
    let rows = (1..=len)
        .map(|id| {
            let manager = if id == 1 { Value::Null } else { int(id - 1) };
            vec![int(id), manager]
        })
        .collect();
    ctx.insert("employees", rows).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn cascade_walks_whole_chain() {
    let ctx = common::start();
    create_employees(&ctx, Cascade, NoAction);
    insert_chain(&ctx, 5).await;

    ctx.delete_keys("employees", &[1]).await.expect("delete chain root");
    assert_eq!(ctx.count("employees"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn cascade_from_middle_keeps_upper_chain() {
    let ctx = common::start();
    create_employees(&ctx, Cascade, NoAction);
    insert_chain(&ctx, 5).await;

    ctx.delete_keys("employees", &[3]).await.expect("delete middle");
    assert_eq!(ctx.ids("employees"), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn row_referencing_itself_is_deleted_once() {
    let ctx = common::start();
    create_employees(&ctx, Cascade, NoAction);
    ctx.insert("employees", vec![vec![int(1), int(1)], vec![int(2), int(1)]])
        .await;

    let deleted = ctx.delete_keys("employees", &[1]).await.expect("delete self loop");
    assert_eq!(deleted, 1);
    assert_eq!(ctx.count("employees"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn set_null_only_touches_direct_reports() {
    let ctx = common::start();
    create_employees(&ctx, SetNull, NoAction);
    insert_chain(&ctx, 4).await;

    ctx.delete_keys("employees", &[2]).await.expect("delete manager");
    assert_eq!(
        ctx.rows("employees"),
        vec![
            vec![int(1), Value::Null],
            vec![int(3), Value::Null],
            vec![int(4), int(3)],
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn update_cascade_renames_manager_key() {
    let ctx = common::start();
    create_employees(&ctx, NoAction, Cascade);
    insert_chain(&ctx, 3).await;
    let root = ctx.row_id("employees", 1);

    ctx.engine
        .execute_update(
            &ctx.session,
            "employees",
            &["id"],
            vec![RowUpdate::new(root, vec![int(100).into()])],
        )
        .await
        .expect("rename root");

    assert_eq!(
        ctx.rows("employees"),
        vec![
            vec![int(2), int(100)],
            vec![int(3), int(2)],
            vec![int(100), Value::Null],
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn update_cascade_on_row_referencing_itself() {
    let ctx = common::start();
    create_employees(&ctx, NoAction, Cascade);
    ctx.insert("employees", vec![vec![int(1), int(1)], vec![int(2), int(1)]])
        .await;
    let boss = ctx.row_id("employees", 1);

    ctx.engine
        .execute_update(
            &ctx.session,
            "employees",
            &["id"],
            vec![RowUpdate::new(boss, vec![int(7).into()])],
        )
        .await
        .expect("rename self-managed row");

    assert_eq!(
        ctx.rows("employees"),
        vec![vec![int(2), int(7)], vec![int(7), int(7)]]
    );
}

fn surviving(managers: &[Option<usize>], deleted: &BTreeSet<usize>) -> Vec<i64> {
    let mut alive = Vec::new();
    for start in 0..managers.len() {
        let mut cursor = Some(start);
        let mut gone = false;
        while let Some(idx) = cursor {
            if deleted.contains(&idx) {
                gone = true;
                break;
            }
            cursor = managers[idx];
        }
        if !gone {
            alive.push(start as i64 + 1);
        }
    }
    alive
}

fn arb_forest() -> impl Strategy<Value = (Vec<Option<usize>>, BTreeSet<usize>)> {
    (1usize..24).prop_flat_map(|len| {
        let managers = (0..len)
            .map(|idx| {
                if idx == 0 {
                    Just(None).boxed()
                } else {
                    prop::option::of(0..idx).boxed()
                }
            })
            .collect::<Vec<_>>();
        (managers, prop::collection::btree_set(0..len, 1..=len.min(4)))
    })
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(48))]

    #[test]
    fn cascade_removes_exactly_the_descendants((managers, deleted) in arb_forest()) {
        let runtime = tokio::runtime::Runtime::new().expect("runtime");
        let remaining = runtime.block_on(async {
            let ctx = common::start();
            create_employees(&ctx, Cascade, NoAction);
            let rows = managers
                .iter()
                .enumerate()
                .map(|(idx, manager)| {
                    let manager = manager.map(|m| int(m as i64 + 1)).unwrap_or(Value::Null);
                    vec![int(idx as i64 + 1), manager]
                })
                .collect();
            ctx.insert("employees", rows).await;
            let keys: Vec<i64> = deleted.iter().map(|idx| *idx as i64 + 1).collect();
            ctx.delete_keys("employees", &keys).await.expect("cascade delete");
            ctx.ids("employees")
        });
        prop_assert_eq!(remaining, surviving(&managers, &deleted));
    }
}
