mod test_support;

use serde_json::json;
use test_support::{error_code, request_err, request_ok, spawn_sidecar, workspace_with_course};

#[test]
fn setup_get_returns_defaults_and_update_validates() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let _ = workspace_with_course(&mut stdin, &mut reader, "lmsd-setup-defaults");

    let setup = request_ok(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(setup["builder"]["maxTitleLength"], json!(200));
    assert_eq!(setup["builder"]["defaultLessonDurationMinutes"], json!(45));
    assert_eq!(setup["attendance"]["maxBatchEdits"], json!(5000));

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "setup.update",
        json!({ "section": "attendance", "patch": { "maxBatchEdits": 250 } }),
    );
    let setup = request_ok(&mut stdin, &mut reader, "3", "setup.get", json!({}));
    assert_eq!(setup["attendance"]["maxBatchEdits"], json!(250));
    assert_eq!(setup["builder"]["maxTitleLength"], json!(200));

    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "setup.update",
        json!({ "section": "builder", "patch": { "maxTitleLength": 5 } }),
    );
    assert_eq!(error_code(&e), "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "5",
        "setup.update",
        json!({ "section": "builder", "patch": { "colour": "blue" } }),
    );
    assert_eq!(error_code(&e), "bad_params");
    let e = request_err(
        &mut stdin,
        &mut reader,
        "6",
        "setup.update",
        json!({ "section": "printer", "patch": {} }),
    );
    assert_eq!(error_code(&e), "bad_params");
}

#[test]
fn builder_settings_apply_to_the_open_session() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let course_id = workspace_with_course(&mut stdin, &mut reader, "lmsd-setup-applied");
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "1",
        "builder.open",
        json!({ "scope": { "kind": "modules", "courseId": course_id } }),
    );
    let long_title = "A title of twenty-five ch";
    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "2",
        "builder.addDraft",
        json!({ "fields": { "title": long_title } }),
    );

    let _ = request_ok(
        &mut stdin,
        &mut reader,
        "3",
        "setup.update",
        json!({ "section": "builder", "patch": { "maxTitleLength": 16 } }),
    );
    let e = request_err(
        &mut stdin,
        &mut reader,
        "4",
        "builder.addDraft",
        json!({ "fields": { "title": long_title } }),
    );
    assert_eq!(error_code(&e), "validation_failed");
    assert_eq!(e["details"]["field"], json!("title"));

    let view = request_ok(&mut stdin, &mut reader, "5", "builder.view", json!({}));
    assert_eq!(view["unsavedChanges"], json!(1));
}

#[test]
fn setup_requires_a_workspace() {
    let (_child, mut stdin, mut reader) = spawn_sidecar();
    let e = request_err(&mut stdin, &mut reader, "1", "setup.get", json!({}));
    assert_eq!(error_code(&e), "no_workspace");
}
