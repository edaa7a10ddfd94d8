mod common;

use common::{int, int_col};
use refcascade::ReferentialAction::{self, Cascade, NoAction, SetNull};
use refcascade::{EngineConfig, ForeignKeySpec, RowUpdate, TableSpec, Value};

/// `alpha(id, beta_id -> beta)` and `beta(id, alpha_id -> alpha)`, both
/// foreign keys with the same actions.
fn create_cycle(ctx: &common::TestCtx, on_delete: ReferentialAction, on_update: ReferentialAction) {
    ctx.engine
        .create_table(
            TableSpec::new("alpha")
                .column(int_col("id"))
                .column(int_col("beta_id"))
                .primary_key(&["id"]),
        )
        .expect("create alpha");
    ctx.engine
        .create_table(
            TableSpec::new("beta")
                .column(int_col("id"))
                .column(int_col("alpha_id"))
                .primary_key(&["id"])
                .foreign_key(
                    ForeignKeySpec::new(&["alpha_id"], "alpha")
                        .on_delete(on_delete)
                        .on_update(on_update),
                ),
        )
        .expect("create beta");
    ctx.engine
        .add_foreign_key(
            "alpha",
            ForeignKeySpec::new(&["beta_id"], "beta")
                .on_delete(on_delete)
                .on_update(on_update),
        )
        .expect("close the cycle");
}

/// Links `alpha.key` to `beta_id`, after both rows exist.
async fn link_alpha(ctx: &common::TestCtx, key: i64, beta_id: i64) {
    let row = ctx.row_id("alpha", key);
    ctx.engine
        .execute_update(
            &ctx.session,
            "alpha",
            &["beta_id"],
            vec![RowUpdate::new(row, vec![int(beta_id).into()])],
        )
        .await
        .expect("link alpha");
}

#[tokio::test(flavor = "multi_thread")]
async fn mutual_cascade_terminates() {
    let ctx = common::start();
    create_cycle(&ctx, Cascade, NoAction);
    ctx.insert("alpha", vec![vec![int(1), Value::Null]]).await;
    ctx.insert("beta", vec![vec![int(1), int(1)]]).await;
    link_alpha(&ctx, 1, 1).await;

    ctx.delete_keys("alpha", &[1]).await.expect("delete alpha");
    assert_eq!(ctx.count("alpha"), 0);
    assert_eq!(ctx.count("beta"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn data_ring_is_deleted_once_around() {
    // alpha1 <- beta1 <- alpha2 <- beta2 <- alpha1
    let ctx = common::start_with(EngineConfig::default().with_max_cascade_depth(4));
    create_cycle(&ctx, Cascade, NoAction);
    ctx.insert("alpha", vec![vec![int(1), Value::Null], vec![int(2), Value::Null]])
        .await;
    ctx.insert("beta", vec![vec![int(1), int(1)], vec![int(2), int(2)]])
        .await;
    link_alpha(&ctx, 2, 1).await;
    link_alpha(&ctx, 1, 2).await;

    ctx.delete_keys("alpha", &[1]).await.expect("delete into ring");
    assert_eq!(ctx.count("alpha"), 0);
    assert_eq!(ctx.count("beta"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn mutual_set_null_stops_after_one_hop() {
    let ctx = common::start();
    create_cycle(&ctx, SetNull, NoAction);
    ctx.insert("alpha", vec![vec![int(1), Value::Null], vec![int(2), Value::Null]])
        .await;
    ctx.insert("beta", vec![vec![int(1), int(1)]]).await;
    link_alpha(&ctx, 2, 1).await;

    ctx.delete_keys("alpha", &[1]).await.expect("delete alpha");
    assert_eq!(ctx.rows("beta"), vec![vec![int(1), Value::Null]]);
    assert_eq!(ctx.rows("alpha"), vec![vec![int(2), int(1)]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn mutual_update_cascade_follows_key_change() {
    let ctx = common::start();
    create_cycle(&ctx, NoAction, Cascade);
    ctx.insert("alpha", vec![vec![int(1), Value::Null]]).await;
    ctx.insert("beta", vec![vec![int(1), int(1)]]).await;
    link_alpha(&ctx, 1, 1).await;
    let alpha = ctx.row_id("alpha", 1);

    ctx.engine
        .execute_update(
            &ctx.session,
            "alpha",
            &["id"],
            vec![RowUpdate::new(alpha, vec![int(10).into()])],
        )
        .await
        .expect("rename alpha");

    assert_eq!(ctx.rows("alpha"), vec![vec![int(10), int(1)]]);
    assert_eq!(ctx.rows("beta"), vec![vec![int(1), int(10)]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn added_foreign_key_checks_existing_rows() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.engine
        .create_table(
            TableSpec::new("children")
                .column(int_col("id"))
                .column(int_col("parent_id"))
                .primary_key(&["id"]),
        )
        .expect("create children");
    ctx.insert("parents", vec![vec![int(1)]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)], vec![int(11), int(2)]])
        .await;

    let err = ctx
        .engine
        .add_foreign_key("children", ForeignKeySpec::new(&["parent_id"], "parents"))
        .expect_err("child 11 has no parent");
    assert_eq!(common::code(&err), "23503");

    ctx.delete_keys("children", &[11]).await.expect("remove orphan");
    ctx.engine
        .add_foreign_key(
            "children",
            ForeignKeySpec::new(&["parent_id"], "parents").on_delete(Cascade),
        )
        .expect("add foreign key");
    let err = ctx
        .engine
        .add_foreign_key("children", ForeignKeySpec::new(&["parent_id"], "parents"))
        .expect_err("default name already taken");
    assert_eq!(common::code(&err), "42710");

    // existing rows were indexed when the key was added
    ctx.delete_keys("parents", &[1]).await.expect("cascade");
    assert_eq!(ctx.count("children"), 0);
}
