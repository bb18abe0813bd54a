//! Observable graphs built from JSON documents.

use std::cell::RefCell;
use std::rc::Rc;

use serde_json::json;
use trellis_runtime::{Object, Value};

#[test]
fn json_objects_and_arrays_become_observable() {
    let doc = json!({
        "title": "todo",
        "done": false,
        "count": 2,
        "items": [{"name": "milk"}, {"name": "eggs"}],
        "owner": null
    });
    let value = Value::from_json(&doc);
    let root = value.as_object().cloned().unwrap();

    assert_eq!(root.get("title"), Value::from("todo"));
    assert_eq!(root.get("done"), Value::from(false));
    assert_eq!(root.get("count"), Value::from(2));
    assert!(root.get("owner").is_null());
    assert_eq!(root.get_path("items.1.name"), Some(Value::from("eggs")));
    assert_eq!(root.get_path("items.length"), Some(Value::from(2)));
}

#[test]
fn json_graph_notifies_on_list_mutation() {
    let root: Object = Value::from_json(&json!({"items": ["a"]}))
        .as_object()
        .cloned()
        .unwrap();
    let seen = Rc::new(RefCell::new(Vec::new()));
    let s = Rc::clone(&seen);
    let _sub = root
        .observe("items.length")
        .subscribe_fn(move |v| s.borrow_mut().push(v.clone()));

    root.get("items").as_list().unwrap().push("b");
    assert_eq!(*seen.borrow(), vec![Value::from(2)]);
}
