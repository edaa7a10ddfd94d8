mod common;

use common::{int, int_col, text, text_col};
use refcascade::ReferentialAction::{Cascade, NoAction, Restrict};
use refcascade::{ErrorClass, ForeignKeySpec, RowUpdate, TableSpec, classify};

#[tokio::test(flavor = "multi_thread")]
async fn referenced_parent_cannot_be_deleted() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", NoAction, NoAction);
    ctx.insert("parents", vec![vec![int(1)]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)]]).await;

    let err = ctx
        .delete_keys("parents", &[1])
        .await
        .expect_err("child still references parent");
    assert_eq!(common::code(&err), "23503");
    assert_eq!(classify(&err), ErrorClass::IntegrityViolation);
    assert_eq!(ctx.ids("parents"), vec![1]);
    assert_eq!(ctx.ids("children"), vec![10]);
}

#[tokio::test(flavor = "multi_thread")]
async fn restrict_behaves_like_no_action() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", Restrict, Restrict);
    ctx.insert("parents", vec![vec![int(1)], vec![int(2)]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)]]).await;

    let err = ctx.delete_keys("parents", &[1]).await.expect_err("restricted");
    assert_eq!(common::code(&err), "23503");

    ctx.delete_keys("parents", &[2])
        .await
        .expect("unreferenced parent can go");
    assert_eq!(ctx.ids("parents"), vec![1]);
}

#[tokio::test(flavor = "multi_thread")]
async fn blocked_grandchild_aborts_whole_cascade() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", Cascade, NoAction);
    ctx.create_child("grandchildren", "children", NoAction, NoAction);
    ctx.insert("parents", vec![vec![int(1)], vec![int(2)]]).await;
    ctx.insert(
        "children",
        vec![vec![int(10), int(1)], vec![int(11), int(1)], vec![int(20), int(2)]],
    )
    .await;
    ctx.insert("grandchildren", vec![vec![int(100), int(11)]]).await;

    let err = ctx
        .delete_keys("parents", &[2, 1])
        .await
        .expect_err("grandchild blocks the cascade");
    assert_eq!(common::code(&err), "23503");
    assert_eq!(ctx.ids("parents"), vec![1, 2]);
    assert_eq!(ctx.ids("children"), vec![10, 11, 20]);
    assert_eq!(ctx.ids("grandchildren"), vec![100]);
}

#[tokio::test(flavor = "multi_thread")]
async fn rows_deleted_together_do_not_block_each_other() {
    let ctx = common::start();
    ctx.engine
        .create_table(
            TableSpec::new("employees")
                .column(int_col("id"))
                .column(int_col("manager_id"))
                .primary_key(&["id"])
                .foreign_key(ForeignKeySpec::new(&["manager_id"], "employees")),
        )
        .expect("create employees");
    ctx.insert(
        "employees",
        vec![
            vec![int(1), refcascade::Value::Null],
            vec![int(2), int(1)],
            vec![int(3), int(1)],
        ],
    )
    .await;

    let err = ctx
        .delete_keys("employees", &[1, 2])
        .await
        .expect_err("3 still reports to 1");
    assert_eq!(common::code(&err), "23503");

    let deleted = ctx
        .delete_keys("employees", &[1, 2, 3])
        .await
        .expect("whole chain deleted at once");
    assert_eq!(deleted, 3);
    assert_eq!(ctx.count("employees"), 0);
}

#[tokio::test(flavor = "multi_thread")]
async fn key_update_with_children_is_rejected() {
    let ctx = common::start();
    ctx.engine
        .create_table(
            TableSpec::new("parents")
                .column(int_col("id"))
                .column(text_col("label"))
                .primary_key(&["id"]),
        )
        .expect("create parents");
    ctx.create_child("children", "parents", NoAction, NoAction);
    ctx.insert("parents", vec![vec![int(1), text("a")]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)]]).await;
    let parent = ctx.row_id("parents", 1);

    let err = ctx
        .engine
        .execute_update(
            &ctx.session,
            "parents",
            &["id"],
            vec![RowUpdate::new(parent, vec![int(5).into()])],
        )
        .await
        .expect_err("key still referenced");
    assert_eq!(common::code(&err), "23503");
    assert_eq!(ctx.ids("parents"), vec![1]);

    let updated = ctx
        .engine
        .execute_update(
            &ctx.session,
            "parents",
            &["label"],
            vec![RowUpdate::new(parent, vec![text("b").into()])],
        )
        .await
        .expect("non-key update is fine");
    assert_eq!(updated, 1);
    assert_eq!(ctx.row("parents", 1), Some(vec![int(1), text("b")]));
}

#[tokio::test(flavor = "multi_thread")]
async fn key_update_to_same_value_is_not_a_change() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", NoAction, NoAction);
    ctx.insert("parents", vec![vec![int(1)]]).await;
    ctx.insert("children", vec![vec![int(10), int(1)]]).await;
    let parent = ctx.row_id("parents", 1);

    ctx.engine
        .execute_update(
            &ctx.session,
            "parents",
            &["id"],
            vec![RowUpdate::new(parent, vec![int(1).into()])],
        )
        .await
        .expect("unchanged key does not block");
    assert_eq!(ctx.ids("children"), vec![10]);
}

#[tokio::test(flavor = "multi_thread")]
async fn child_cannot_reference_missing_parent() {
    let ctx = common::start();
    ctx.create_parent("parents");
    ctx.create_child("children", "parents", NoAction, NoAction);
    ctx.insert("parents", vec![vec![int(1)]]).await;

    let err = ctx
        .engine
        .insert_values(&ctx.session, "children", vec![vec![int(10), int(9)]])
        .await
        .expect_err("no parent 9");
    assert_eq!(common::code(&err), "23503");

    ctx.insert("children", vec![vec![int(10), int(1)]]).await;
    let child = ctx.row_id("children", 10);
    let err = ctx
        .engine
        .execute_update(
            &ctx.session,
            "children",
            &["parent_id"],
            vec![RowUpdate::new(child, vec![int(9).into()])],
        )
        .await
        .expect_err("re-pointing at a missing parent");
    assert_eq!(common::code(&err), "23503");
    assert_eq!(ctx.rows("children"), vec![vec![int(10), int(1)]]);
}
