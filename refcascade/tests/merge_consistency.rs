mod common;

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use common::{int, int_col};
use refcascade::ReferentialAction::{Cascade, NoAction, SetDefault, SetNull};
use refcascade::{
    ErrorClass, ForeignKeySpec, RowUpdate, TableSpec, TriggerEvent, TriggerFiring, TriggerLevel,
    Value, classify,
};

/// roots <- (lefts, rights) both ON DELETE CASCADE.
fn create_branches(ctx: &common::TestCtx) {
    ctx.create_parent("roots");
    ctx.create_child("lefts", "roots", Cascade, NoAction);
    ctx.create_child("rights", "roots", Cascade, NoAction);
}

async fn seed_branches(ctx: &common::TestCtx) {
    ctx.insert("roots", vec![vec![int(1)]]).await;
    ctx.insert("lefts", vec![vec![int(1), int(1)]]).await;
    ctx.insert("rights", vec![vec![int(1), int(1)]]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn disjoint_set_null_paths_both_apply() {
    let ctx = common::start();
    create_branches(&ctx);
    ctx.engine
        .create_table(
            TableSpec::new("links")
                .column(int_col("id"))
                .column(int_col("left_id"))
                .column(int_col("right_id"))
                .primary_key(&["id"])
                .foreign_key(ForeignKeySpec::new(&["left_id"], "lefts").on_delete(SetNull))
                .foreign_key(ForeignKeySpec::new(&["right_id"], "rights").on_delete(SetNull)),
        )
        .expect("create links");
    seed_branches(&ctx).await;
    ctx.insert("links", vec![vec![int(100), int(1), int(1)]]).await;

    let firings = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&firings);
    ctx.engine
        .register_trigger(
            "links",
            "links_updated",
            TriggerEvent::UpdateAfter,
            TriggerLevel::Row,
            move |firing: &TriggerFiring<'_>| -> anyhow::Result<()> {
                assert_eq!(
                    firing.new_rows[0],
                    vec![int(100), Value::Null, Value::Null]
                );
                seen.fetch_add(1, Ordering::SeqCst);
                Ok(())
            },
        )
        .expect("register trigger");

    ctx.delete_keys("roots", &[1]).await.expect("delete root");

    assert_eq!(ctx.count("lefts"), 0);
    assert_eq!(ctx.count("rights"), 0);
    assert_eq!(
        ctx.rows("links"),
        vec![vec![int(100), Value::Null, Value::Null]]
    );
    assert_eq!(firings.load(Ordering::SeqCst), 1, "merged row updated once");
}

#[tokio::test(flavor = "multi_thread")]
async fn conflicting_writes_to_one_column_fail() {
    let ctx = common::start();
    create_branches(&ctx);
    ctx.engine
        .create_table(
            TableSpec::new("links")
                .column(int_col("id"))
                .column(int_col("branch_id").default_value(int(0)))
                .primary_key(&["id"])
                .foreign_key(ForeignKeySpec::new(&["branch_id"], "lefts").on_delete(SetNull))
                .foreign_key(ForeignKeySpec::new(&["branch_id"], "rights").on_delete(SetDefault)),
        )
        .expect("create links");
    ctx.insert("roots", vec![vec![int(0)], vec![int(1)]]).await;
    ctx.insert("lefts", vec![vec![int(0), int(0)], vec![int(1), int(1)]])
        .await;
    ctx.insert("rights", vec![vec![int(0), int(0)], vec![int(1), int(1)]])
        .await;
    ctx.insert("links", vec![vec![int(100), int(1)]]).await;

    let err = ctx
        .delete_keys("roots", &[1])
        .await
        .expect_err("NULL and 0 written to the same column");
    assert_eq!(common::code(&err), "27000");
    assert_eq!(classify(&err), ErrorClass::TriggeredDataChange);

    assert_eq!(ctx.ids("roots"), vec![0, 1]);
    assert_eq!(ctx.ids("lefts"), vec![0, 1]);
    assert_eq!(ctx.ids("rights"), vec![0, 1]);
    assert_eq!(ctx.rows("links"), vec![vec![int(100), int(1)]]);
}

fn create_staff(ctx: &common::TestCtx) {
    ctx.engine
        .create_table(
            TableSpec::new("staff")
                .column(int_col("id"))
                .column(int_col("manager_id"))
                .primary_key(&["id"])
                .foreign_key(ForeignKeySpec::new(&["manager_id"], "staff").on_update(Cascade)),
        )
        .expect("create staff");
}

async fn seed_staff(ctx: &common::TestCtx) {
    ctx.insert(
        "staff",
        vec![
            vec![int(1), Value::Null],
            vec![int(2), int(1)],
            vec![int(3), Value::Null],
        ],
    )
    .await;
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_write_disagreeing_with_cascade_fails() {
    let ctx = common::start();
    create_staff(&ctx);
    seed_staff(&ctx).await;
    let boss = ctx.row_id("staff", 1);
    let report = ctx.row_id("staff", 2);

    let err = ctx
        .engine
        .execute_update(
            &ctx.session,
            "staff",
            &["id", "manager_id"],
            vec![
                RowUpdate::new(boss, vec![int(7).into(), Value::Null.into()]),
                RowUpdate::new(report, vec![int(2).into(), int(3).into()]),
            ],
        )
        .await
        .expect_err("cascade writes 7 where the statement writes 3");
    assert_eq!(common::code(&err), "27000");
    assert_eq!(
        ctx.rows("staff"),
        vec![
            vec![int(1), Value::Null],
            vec![int(2), int(1)],
            vec![int(3), Value::Null],
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn direct_write_agreeing_with_cascade_succeeds() {
    let ctx = common::start();
    create_staff(&ctx);
    seed_staff(&ctx).await;
    let boss = ctx.row_id("staff", 1);
    let report = ctx.row_id("staff", 2);

    let updated = ctx
        .engine
        .execute_update(
            &ctx.session,
            "staff",
            &["id", "manager_id"],
            vec![
                RowUpdate::new(boss, vec![int(7).into(), Value::Null.into()]),
                RowUpdate::new(report, vec![int(2).into(), int(7).into()]),
            ],
        )
        .await
        .expect("both writes agree");
    assert_eq!(updated, 2);
    assert_eq!(
        ctx.rows("staff"),
        vec![
            vec![int(2), int(7)],
            vec![int(3), Value::Null],
            vec![int(7), Value::Null],
        ]
    );
}

#[tokio::test(flavor = "multi_thread")]
async fn two_key_cascades_merge_into_one_image() {
    let ctx = common::start();
    ctx.create_parent("teams");
    ctx.engine
        .create_table(
            TableSpec::new("matches")
                .column(int_col("id"))
                .column(int_col("home_id"))
                .column(int_col("away_id"))
                .column(int_col("points"))
                .primary_key(&["id"])
                .foreign_key(ForeignKeySpec::new(&["home_id"], "teams").on_update(Cascade))
                .foreign_key(ForeignKeySpec::new(&["away_id"], "teams").on_update(Cascade)),
        )
        .expect("create matches");
    ctx.insert("teams", vec![vec![int(1)], vec![int(2)]]).await;
    ctx.insert(
        "matches",
        vec![
            vec![int(10), int(1), int(1), int(3)],
            vec![int(11), int(1), int(2), int(0)],
        ],
    )
    .await;
    let team = ctx.row_id("teams", 1);

    ctx.engine
        .execute_update(
            &ctx.session,
            "teams",
            &["id"],
            vec![RowUpdate::new(team, vec![int(5).into()])],
        )
        .await
        .expect("rename team");
    assert_eq!(
        ctx.rows("matches"),
        vec![
            vec![int(10), int(5), int(5), int(3)],
            vec![int(11), int(5), int(2), int(0)],
        ]
    );
}
