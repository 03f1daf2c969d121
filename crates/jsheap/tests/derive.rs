//! Tests for the `#[derive(Trace)]` and `#[derive(HeapObject)]` macros.

#![cfg(feature = "derive")]

use std::cell::{Cell, RefCell};
use std::collections::HashMap;

use jsheap::{Gc, HeapConfig, HeapObject, MemoryManager, Trace, Value};

#[derive(Trace, HeapObject)]
struct Leaf {
    id: u32,
}

#[derive(Trace, HeapObject)]
struct Tree {
    left: Option<Gc<Tree>>,
    right: Option<Gc<Tree>>,
    leaf: Gc<Leaf>,
}

#[derive(Trace, HeapObject)]
enum Shape {
    Empty,
    Single(Gc<Leaf>),
    Named { name: String, target: Value },
    Skipped(#[jsheap(skip)] u64, Gc<Leaf>),
}

#[derive(Trace, HeapObject)]
struct Wrapper<T> {
    inner: T,
}

#[derive(Trace, HeapObject)]
struct Table {
    slots: RefCell<Vec<Value>>,
    by_name: HashMap<String, Value>,
    cached: Cell<Option<Gc<Leaf>>>,
}

#[derive(Trace, HeapObject)]
struct Tuple(Value, #[jsheap(skip)] usize);

fn manager() -> MemoryManager {
    MemoryManager::with_config(HeapConfig::new()).unwrap()
}

fn leaf(mm: &mut MemoryManager, id: u32) -> Gc<Leaf> {
    mm.alloc(Leaf { id })
}

#[test]
fn test_class_names() {
    assert_eq!(Leaf::NAME, "Leaf");
    assert_eq!(Wrapper::<u8>::NAME, "Wrapper");
    assert_eq!(Shape::NAME, "Shape");
}

#[test]
fn test_struct_fields_are_traced() {
    let mut mm = manager();
    let l1 = leaf(&mut mm, 1);
    let l2 = leaf(&mut mm, 2);
    let child = mm.alloc(Tree {
        left: None,
        right: None,
        leaf: l2,
    });
    let root = mm.alloc(Tree {
        left: Some(child),
        right: None,
        leaf: l1,
    });
    mm.new_persistent(root);
    let garbage = leaf(&mut mm, 3);

    mm.run_gc();
    assert_eq!(mm.get(l1).unwrap().id, 1);
    assert_eq!(mm.get(l2).unwrap().id, 2);
    assert!(mm.get(child).is_some());
    assert!(mm.get(garbage).is_none());
}

#[test]
fn test_enum_variants_are_traced() {
    let mut mm = manager();
    let a = leaf(&mut mm, 1);
    let b = leaf(&mut mm, 2);
    let c = leaf(&mut mm, 3);
    let shapes = [
        mm.alloc(Shape::Empty),
        mm.alloc(Shape::Single(a)),
        mm.alloc(Shape::Named {
            name: "b".to_owned(),
            target: b.into(),
        }),
        mm.alloc(Shape::Skipped(7, c)),
    ];
    for shape in shapes {
        mm.stack_mut().push(shape.into());
    }

    mm.run_gc();
    assert!(mm.get(a).is_some());
    assert!(mm.get(b).is_some());
    assert!(mm.get(c).is_some());
    assert_eq!(mm.last_gc_metrics().objects_reclaimed, 0);
}

#[test]
fn test_generic_and_container_fields() {
    let mut mm = manager();
    let a = leaf(&mut mm, 1);
    let b = leaf(&mut mm, 2);
    let c = leaf(&mut mm, 3);
    let d = leaf(&mut mm, 4);

    let wrapped = mm.alloc(Wrapper { inner: vec![a] });
    let table = mm.alloc(Table {
        slots: RefCell::new(vec![b.into()]),
        by_name: HashMap::from([("c".to_owned(), c.into())]),
        cached: Cell::new(Some(d)),
    });
    let tuple = mm.alloc(Tuple(Value::Null, 9));
    mm.new_persistent(wrapped);
    mm.new_persistent(table);
    mm.new_persistent(tuple);

    mm.run_gc();
    for gc in [a, b, c, d] {
        assert!(mm.get(gc).is_some());
    }

    mm.get(table).unwrap().cached.set(None);
    mm.get(table).unwrap().slots.borrow_mut().clear();
    mm.run_gc();
    assert!(mm.get(b).is_none());
    assert!(mm.get(d).is_none());
    assert!(mm.get(c).is_some());
    assert_eq!(mm.get(tuple).unwrap().1, 9);
}
