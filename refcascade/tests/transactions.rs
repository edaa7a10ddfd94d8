mod common;

use common::int;
use refcascade::ReferentialAction::{Cascade, NoAction, SetNull};
use refcascade::{RowUpdate, Value};

async fn seed(ctx: &common::TestCtx) {
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", Cascade, Cascade);
    ctx.create_child("notes", "parents", SetNull, NoAction);
    ctx.insert("parents", vec![vec![int(1)], vec![int(2)]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)], vec![int(11), int(2)]])
        .await;
    ctx.insert("notes", vec![vec![int(20), int(1)]]).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn rollback_restores_cascaded_rows() {
    let ctx = common::start();
    seed(&ctx).await;

    ctx.engine.begin(&ctx.session).expect("begin");
    ctx.delete_keys("parents", &[1]).await.expect("delete parent");
    assert_eq!(ctx.ids("children"), vec![11]);
    assert_eq!(ctx.rows("notes"), vec![vec![int(20), Value::Null]]);

    ctx.engine.rollback(&ctx.session).expect("rollback");
    assert_eq!(ctx.ids("parents"), vec![1, 2]);
    assert_eq!(ctx.rows("children"), vec![vec![int(10), int(1)], vec![int(11), int(2)]]);
    assert_eq!(ctx.rows("notes"), vec![vec![int(20), int(1)]]);

    // restored rows are reachable through the foreign key index again
    ctx.delete_keys("parents", &[1]).await.expect("delete again");
    assert_eq!(ctx.ids("children"), vec![11]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rollback_undoes_statements_in_reverse() {
    let ctx = common::start();
    seed(&ctx).await;
    let parent = ctx.row_id("parents", 2);

    ctx.engine.begin(&ctx.session).expect("begin");
    ctx.engine
        .execute_update(
            &ctx.session,
            "parents",
            &["id"],
            vec![RowUpdate::new(parent, vec![int(5).into()])],
        )
        .await
        .expect("rename");
    assert_eq!(ctx.rows("children"), vec![vec![int(10), int(1)], vec![int(11), int(5)]]);
    ctx.delete_keys("parents", &[5]).await.expect("delete renamed");
    assert_eq!(ctx.ids("children"), vec![10]);

    ctx.engine.rollback(&ctx.session).expect("rollback");
    assert_eq!(ctx.ids("parents"), vec![1, 2]);
    assert_eq!(ctx.rows("children"), vec![vec![int(10), int(1)], vec![int(11), int(2)]]);
}

#[tokio::test(flavor = "multi_thread")]
async fn commit_makes_cascade_durable() {
    let ctx = common::start();
    seed(&ctx).await;
    let observer = ctx.engine.create_session();

    ctx.engine.begin(&ctx.session).expect("begin");
    ctx.delete_keys("parents", &[1]).await.expect("delete parent");
    ctx.engine.commit(&ctx.session).expect("commit");

    let children = ctx.engine.scan(&observer, "children").expect("scan");
    assert_eq!(children.len(), 1);
    let notes = ctx.engine.scan(&observer, "notes").expect("scan");
    assert_eq!(notes[0].1, vec![int(20), Value::Null]);
}

#[tokio::test(flavor = "multi_thread")]
async fn transaction_state_errors() {
    let ctx = common::start();

    let err = ctx.engine.commit(&ctx.session).expect_err("nothing to commit");
    assert_eq!(common::code(&err), "25P01");
    let err = ctx.engine.rollback(&ctx.session).expect_err("nothing to roll back");
    assert_eq!(common::code(&err), "25P01");

    ctx.engine.begin(&ctx.session).expect("begin");
    let err = ctx.engine.begin(&ctx.session).expect_err("nested begin");
    assert_eq!(common::code(&err), "25001");
    assert!(ctx.session.in_transaction());
    ctx.engine.commit(&ctx.session).expect("commit");
    assert!(!ctx.session.in_transaction());
}

#[tokio::test(flavor = "multi_thread")]
async fn failed_statement_keeps_earlier_work_in_transaction() {
    let ctx = common::start();
    seed(&ctx).await;
    ctx.create_child("blockers", "parents", NoAction, NoAction);
    ctx.insert("blockers", vec![vec![int(30), int(2)]]).await;

    ctx.engine.begin(&ctx.session).expect("begin");
    ctx.delete_keys("parents", &[1]).await.expect("delete parent 1");
    let err = ctx
        .delete_keys("parents", &[2])
        .await
        .expect_err("parent 2 is still referenced");
    assert_eq!(common::code(&err), "23503");
    assert!(ctx.session.in_transaction());
    assert_eq!(ctx.ids("parents"), vec![2]);
    assert_eq!(ctx.ids("children"), vec![11]);

    ctx.engine.commit(&ctx.session).expect("commit");
    assert_eq!(ctx.ids("parents"), vec![2]);
}

#[tokio::test(flavor = "multi_thread")]
async fn closing_a_session_rolls_back() {
    let ctx = common::start();
    seed(&ctx).await;
    let worker = ctx.engine.create_session();
    let parent = ctx.row_id("parents", 1);

    ctx.engine.begin(&worker).expect("begin");
    ctx.engine
        .execute_delete(&worker, "parents", &[parent])
        .await
        .expect("delete in worker transaction");
    ctx.engine.close_session(&worker).expect("close");

    assert_eq!(ctx.ids("parents"), vec![1, 2]);
    assert_eq!(ctx.ids("children"), vec![10, 11]);
    // locks were released with the transaction
    ctx.delete_keys("parents", &[1]).await.expect("delete");
    assert_eq!(ctx.ids("children"), vec![11]);
}
