//! Integration tests for the JSON document engine

use docstore_document::{
    path, ChangeOptions, Doc, DocumentEngine, Draft, JsonEngine, JsonPatcher, Patch,
    PatchInverter,
};
use serde_json::json;
use std::cell::RefCell;
use std::rc::Rc;

fn commit(
    engine: &JsonEngine,
    doc: &Doc,
    message: &str,
    mutator: impl FnOnce(&mut Draft) -> Result<(), docstore_document::DocumentError> + 'static,
) -> Doc {
    engine
        .change(doc, ChangeOptions::new().with_message(message), Box::new(mutator))
        .unwrap()
}

#[test]
fn test_heads_track_versions_not_content() {
    let engine = JsonEngine::new();
    let doc = Doc::from_value(json!({ "count": 0 })).unwrap();

    let up = commit(&engine, &doc, "up", |d| d.put(path!["count"], 1));
    let down = commit(&engine, &up, "down", |d| d.put(path!["count"], 0));

    // Same content as the original, different version
    assert_eq!(down.value(), doc.value());
    assert_ne!(engine.heads(&down), engine.heads(&doc));
    assert_eq!(down.history().len(), 3);
}

#[test]
fn test_merge_between_forks() -> anyhow::Result<()> {
    let engine = JsonEngine::new();
    let base = Doc::from_value(json!({ "todos": [], "title": "list" }))?;
    let remote = base.fork();

    let local = commit(&engine, &base, "local", |d| d.put(path!["title"], "groceries"));
    let remote = commit(&engine, &remote, "remote", |d| d.push(path!["todos"], "milk"));

    let (merged, patches) = engine.merge(&local, &remote)?;

    assert_eq!(
        merged.value(),
        &json!({ "todos": ["milk"], "title": "groceries" })
    );
    assert_eq!(merged.heads().len(), 2);
    assert_eq!(
        patches,
        vec![Patch::Insert {
            path: path!["todos", 0usize],
            values: vec![json!("milk")],
        }]
    );

    // Merging again is a no-op
    let (again, patches) = engine.merge(&merged, &remote)?;
    assert!(Doc::ptr_eq(&again, &merged));
    assert!(patches.is_empty());
    Ok(())
}

#[test]
fn test_last_local_change_ignores_remote_changes() {
    let engine = JsonEngine::new();
    let base = Doc::from_value(json!({ "count": 0 })).unwrap();
    let remote = commit(&engine, &base.fork(), "remote edit", |d| d.increment(path!["count"], 2));

    let local = commit(&engine, &base, "local edit", |d| d.increment(path!["count"], 1));
    let (merged, _) = engine.merge(&local, &remote).unwrap();

    let last = engine.last_local_change(&merged).unwrap();
    let decoded = engine.decode_change(&last);
    assert_eq!(decoded.message.as_deref(), Some("local edit"));
    assert_eq!(decoded.actor, merged.actor());
    assert_eq!(merged.get(&path!["count"]), Some(&json!(3)));
}

#[test]
fn test_last_local_change_absent_on_fresh_replica() {
    let engine = JsonEngine::new();
    let base = Doc::from_value(json!({ "count": 0 })).unwrap();

    assert!(engine.last_local_change(&base).is_some());
    assert!(engine.last_local_change(&base.fork()).is_none());
}

#[test]
fn test_inverse_undoes_multi_step_commit() {
    let engine = JsonEngine::new();
    let patcher = JsonPatcher::new();
    let before = Doc::from_value(json!({ "text": "hello", "items": [1, 2, 3] })).unwrap();

    let after = commit(&engine, &before, "mixed", |d| {
        d.splice_text(path!["text"], 0, 1, "J")?;
        d.delete_range(path!["items"], 0, 2)?;
        d.push(path!["items"], 4)
    });
    assert_eq!(after.value(), &json!({ "text": "Jello", "items": [3, 4] }));

    // Capture the forward patches of the same edit through the callback
    let captured = Rc::new(RefCell::new(Vec::new()));
    let sink = captured.clone();
    engine
        .change(
            &before,
            ChangeOptions::new().with_patch_callback(move |patches, _| {
                sink.borrow_mut().extend_from_slice(patches)
            }),
            Box::new(|d: &mut Draft| {
                d.splice_text(path!["text"], 0, 1, "J")?;
                d.delete_range(path!["items"], 0, 2)?;
                d.push(path!["items"], 4)
            }),
        )
        .unwrap();
    let patches: Vec<Patch> = captured.borrow().clone();
    assert_eq!(patches.len(), 4);

    let inverse = patcher.invert(&before, &patches).unwrap();
    let restored = engine
        .change(
            &after,
            ChangeOptions::new(),
            Box::new(move |d: &mut Draft| {
                for patch in &inverse {
                    patcher.apply(d, patch)?;
                }
                Ok(())
            }),
        )
        .unwrap();

    assert_eq!(restored.value(), before.value());
}
