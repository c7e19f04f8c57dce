use axum::http::StatusCode;
use serde_json::json;

use tingxie_backend::auth::now_ms;
use tingxie_backend::services::reminders::generate_reminders;
use tingxie_backend::state::local_offset;

mod common;

use common::{create_child, delete, get, login, post, put, seed_curriculum, spawn_app, TestApp};

const DAY_MS: i64 = 24 * 60 * 60 * 1000;

/// Creates a family owned by `owner` and joins every token in `members`.
async fn family_with(t: &TestApp, owner: &str, members: &[&str]) -> i64 {
    let (status, family) = post(&t.app, "/api/families", owner, json!({ "name": "一家" })).await;
    assert_eq!(status, StatusCode::OK);
    let code = family["data"]["inviteCode"].as_str().unwrap().to_string();
    for member in members {
        let (status, _) = post(&t.app, "/api/families/join", member, json!({ "inviteCode": code })).await;
        assert_eq!(status, StatusCode::OK);
    }
    family["data"]["id"].as_i64().unwrap()
}

async fn count_rows(t: &TestApp, table: &str, child_id: i64) -> i64 {
    let sql = match table {
        "dictation_task_items" => r#"SELECT COUNT(*) FROM "dictation_task_items" i
            JOIN "dictation_tasks" d ON d."id" = i."task_id" WHERE d."child_id" = ?"#
            .to_string(),
        _ => format!(r#"SELECT COUNT(*) FROM "{table}" WHERE "child_id" = ?"#),
    };
    sqlx::query_scalar(&sql).bind(child_id).fetch_one(t.db.pool()).await.unwrap()
}

#[tokio::test]
async fn members_share_children() {
    let t = spawn_app().await;
    let (owner, owner_id) = login(&t.app, "owner").await;
    let (member, member_id) = login(&t.app, "member").await;
    let (stranger, _) = login(&t.app, "stranger").await;

    let (status, family) = post(&t.app, "/api/families", &owner, json!({ "name": "王家" })).await;
    assert_eq!(status, StatusCode::OK);
    let family_id = family["data"]["id"].as_i64().unwrap();
    let invite_code = family["data"]["inviteCode"].as_str().unwrap().to_string();
    assert_eq!(invite_code.len(), 8);
    assert_eq!(family["data"]["role"], "owner");

    // codes are case-insensitive
    let (status, joined) = post(
        &t.app,
        "/api/families/join",
        &member,
        json!({ "inviteCode": invite_code.to_lowercase() }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(joined["data"]["members"].as_array().unwrap().len(), 2);

    let (status, body) = post(&t.app, "/api/families/join", &member, json!({ "inviteCode": invite_code })).await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "CONFLICT");

    let (status, _) = post(&t.app, "/api/families/join", &stranger, json!({ "inviteCode": "ZZZZZZZZ" })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, child) = post(
        &t.app,
        "/api/children",
        &owner,
        json!({ "name": "小宝", "grade": 2, "semester": 1, "familyId": family_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let child_id = child["data"]["id"].as_i64().unwrap();
    assert_eq!(child["data"]["textbookVersion"], "renjiao");

    let (_, listed) = get(&t.app, "/api/children", &member).await;
    assert_eq!(listed["data"].as_array().unwrap().len(), 1);

    let (status, body) = get(&t.app, &format!("/api/children/{child_id}"), &stranger).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "CHILD_NOT_FOUND");

    let (status, body) = get(&t.app, &format!("/api/families/{family_id}"), &stranger).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "FAMILY_NOT_FOUND");

    let (status, _) = post(&t.app, &format!("/api/families/{family_id}/leave"), &owner, json!({})).await;
    assert_eq!(status, StatusCode::CONFLICT);

    let (status, _) = delete(
        &t.app,
        &format!("/api/families/{family_id}/members/{owner_id}"),
        &member,
    )
    .await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = delete(
        &t.app,
        &format!("/api/families/{family_id}/members/{owner_id}"),
        &owner,
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let (status, _) = delete(
        &t.app,
        &format!("/api/families/{family_id}/members/{member_id}"),
        &owner,
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = get(&t.app, &format!("/api/children/{child_id}"), &member).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn owner_regenerates_invite_code() {
    let t = spawn_app().await;
    let (owner, _) = login(&t.app, "owner").await;
    let (member, _) = login(&t.app, "member").await;

    let (_, family) = post(&t.app, "/api/families", &owner, json!({ "name": "李家" })).await;
    let family_id = family["data"]["id"].as_i64().unwrap();
    let old_code = family["data"]["inviteCode"].as_str().unwrap().to_string();

    let (status, _) = post(&t.app, "/api/families/join", &member, json!({ "inviteCode": old_code })).await;
    assert_eq!(status, StatusCode::OK);

    let (status, _) = post(&t.app, &format!("/api/families/{family_id}/invite-code"), &member, json!({})).await;
    assert_eq!(status, StatusCode::FORBIDDEN);

    let (status, body) = post(&t.app, &format!("/api/families/{family_id}/invite-code"), &owner, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    assert_ne!(body["data"]["inviteCode"].as_str().unwrap(), old_code);

    let (status, _) = post(&t.app, &format!("/api/families/{family_id}/leave"), &member, json!({})).await;
    assert_eq!(status, StatusCode::OK);
    let (_, families) = get(&t.app, "/api/families", &member).await;
    assert!(families["data"].as_array().unwrap().is_empty());
}

#[tokio::test]
async fn child_crud_and_validation() {
    let t = spawn_app().await;
    let (token, _) = login(&t.app, "parent").await;

    let (status, body) = post(&t.app, "/api/children", &token, json!({ "name": "小红" })).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "MISSING_REQUIRED_PARAM");

    let (status, body) = post(
        &t.app,
        "/api/children",
        &token,
        json!({ "name": "小红", "grade": 7, "semester": 1 }),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");

    let child_id = create_child(&t.app, &token, "小红").await;

    let (status, body) = put(
        &t.app,
        &format!("/api/children/{child_id}"),
        &token,
        json!({ "grade": 3, "gender": "female" }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grade"], 3);
    assert_eq!(body["data"]["name"], "小红");

    let (status, _) = delete(&t.app, &format!("/api/children/{child_id}"), &token).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&t.app, &format!("/api/children/{child_id}"), &token).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn only_creator_or_family_owner_moves_a_child() {
    let t = spawn_app().await;
    let (owner, _) = login(&t.app, "owner").await;
    let (creator, _) = login(&t.app, "creator").await;
    let (member, _) = login(&t.app, "member").await;
    let family_id = family_with(&t, &owner, &[&creator, &member]).await;
    let elsewhere = family_with(&t, &member, &[]).await;
    let creators_own = family_with(&t, &creator, &[]).await;

    let (status, child) = post(
        &t.app,
        "/api/children",
        &creator,
        json!({ "name": "小宝", "grade": 1, "semester": 1, "familyId": family_id }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let child_id = child["data"]["id"].as_i64().unwrap();
    let uri = format!("/api/children/{child_id}");

    let (status, body) = put(&t.app, &uri, &member, json!({ "familyId": elsewhere })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");
    let (status, body) = put(&t.app, &uri, &member, json!({ "familyId": null })).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    // members may still edit the other fields
    let (status, body) = put(&t.app, &uri, &member, json!({ "grade": 2, "familyId": family_id })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["grade"], 2);
    assert_eq!(body["data"]["familyId"], family_id);

    // the target family must be one of the caller's
    let (status, body) = put(&t.app, &uri, &creator, json!({ "familyId": elsewhere })).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["code"], "FAMILY_NOT_FOUND");

    let (status, body) = put(&t.app, &uri, &creator, json!({ "familyId": creators_own })).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["data"]["familyId"], creators_own);
    let (status, _) = get(&t.app, &uri, &member).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = put(&t.app, &uri, &creator, json!({ "familyId": null })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["familyId"].is_null());

    let (status, body) = put(&t.app, &uri, &creator, json!({ "name": "大宝" })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["familyId"].is_null());
    assert_eq!(body["data"]["name"], "大宝");
}

#[tokio::test]
async fn family_owner_can_take_a_child_out_of_the_family() {
    let t = spawn_app().await;
    let (owner, _) = login(&t.app, "owner").await;
    let (creator, _) = login(&t.app, "creator").await;
    let family_id = family_with(&t, &owner, &[&creator]).await;

    let (_, child) = post(
        &t.app,
        "/api/children",
        &creator,
        json!({ "name": "小宝", "grade": 1, "semester": 1, "familyId": family_id }),
    )
    .await;
    let child_id = child["data"]["id"].as_i64().unwrap();

    let (status, body) = put(&t.app, &format!("/api/children/{child_id}"), &owner, json!({ "familyId": null })).await;
    assert_eq!(status, StatusCode::OK);
    assert!(body["data"]["familyId"].is_null());

    let (status, _) = get(&t.app, &format!("/api/children/{child_id}"), &owner).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
    let (status, _) = get(&t.app, &format!("/api/children/{child_id}"), &creator).await;
    assert_eq!(status, StatusCode::OK);
}

#[tokio::test]
async fn deleting_a_child_removes_its_history() {
    let t = spawn_app().await;
    seed_curriculum(&t.db).await;
    let (owner, _) = login(&t.app, "owner").await;
    let (creator, _) = login(&t.app, "creator").await;
    let (member, _) = login(&t.app, "member").await;
    let family_id = family_with(&t, &owner, &[&creator, &member]).await;

    let (_, child) = post(
        &t.app,
        "/api/children",
        &creator,
        json!({ "name": "小宝", "grade": 1, "semester": 1, "familyId": family_id }),
    )
    .await;
    let child_id = child["data"]["id"].as_i64().unwrap();

    let (status, _) = put(
        &t.app,
        "/api/dictation/config",
        &creator,
        json!({ "child_id": child_id, "words_per_dictation": 5 }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let (_, task) = post(
        &t.app,
        "/api/dictation/task/create",
        &creator,
        json!({ "child_id": child_id, "unit": 1 }),
    )
    .await;
    let task_id = task["data"]["id"].as_i64().unwrap();
    let (status, _) = post(
        &t.app,
        &format!("/api/dictation/task/{task_id}/submit"),
        &creator,
        json!({ "results": [] }),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let stats = generate_reminders(t.db.pool(), now_ms() + 2 * DAY_MS, local_offset(8))
        .await
        .unwrap();
    assert!(stats.reminders_written >= 1);

    let tables = [
        "dictation_configs",
        "dictation_tasks",
        "dictation_task_items",
        "word_reviews",
        "review_reminders",
    ];
    for table in tables {
        assert!(count_rows(&t, table, child_id).await > 0, "{table} not seeded");
    }

    let (status, body) = delete(&t.app, &format!("/api/children/{child_id}"), &member).await;
    assert_eq!(status, StatusCode::FORBIDDEN);
    assert_eq!(body["code"], "FORBIDDEN");

    let (status, _) = delete(&t.app, &format!("/api/children/{child_id}"), &owner).await;
    assert_eq!(status, StatusCode::OK);
    let (status, _) = get(&t.app, &format!("/api/children/{child_id}"), &creator).await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    for table in tables {
        assert_eq!(count_rows(&t, table, child_id).await, 0, "{table} kept rows");
    }
}
