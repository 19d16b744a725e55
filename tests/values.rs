mod common;

use common::{attach, new_world, simple_type, EvalBehavior, World};
use mdbg::debugger::channel::{
    ChainHandle, FieldToken, FrameHandle, MethodToken, NativeChain, NativeFrame, ObjectHandle,
    Primitive, RawValue, SymbolInfo, TypeId,
};
use mdbg::debugger::types::FieldInfo;
use mdbg::debugger::variable::Expr;
use mdbg::debugger::Error;
use std::cell::RefCell;
use std::rc::Rc;

const BASE: TypeId = TypeId(1);
const DERIVED: TypeId = TypeId(2);
const STRANGER: TypeId = TypeId(3);

const BASE_X: FieldToken = FieldToken(11);
const DERIVED_X: FieldToken = FieldToken(12);
const STATIC_COUNT: FieldToken = FieldToken(13);
const NAME_BACKING: FieldToken = FieldToken(14);
const BASE_Y: FieldToken = FieldToken(15);
const BAD_FIELD: FieldToken = FieldToken(16);

const NAME_GETTER: MethodToken = MethodToken(21);
const NAME_SETTER: MethodToken = MethodToken(22);
const READONLY_GETTER: MethodToken = MethodToken(23);

const OBJ: u64 = 100;

fn field(name: &str, token: FieldToken, is_static: bool, declaring: TypeId) -> FieldInfo {
    FieldInfo {
        name: name.to_string(),
        token,
        is_static,
        declaring_type: declaring,
    }
}

/// A paused world with one thread, one symbol-bearing frame and an object
/// `obj` of type `Derived` (which shadows the `x` field of `Base`).
fn value_world() -> Rc<RefCell<World>> {
    let world = new_world();
    let tid = world.borrow_mut().add_thread(1, true);
    let mut w = world.borrow_mut();

    let mut base = simple_type(BASE, "Base", None);
    base.fields.push(field("x", BASE_X, false, BASE));
    base.fields.push(field("y", BASE_Y, false, BASE));
    base.fields.push(field("s_count", STATIC_COUNT, true, BASE));
    base.properties.push(mdbg::debugger::types::PropertyInfo {
        name: "Name".to_string(),
        getter: Some(NAME_GETTER),
        setter: Some(NAME_SETTER),
        is_static: false,
        declaring_type: BASE,
    });
    base.properties.push(mdbg::debugger::types::PropertyInfo {
        name: "ReadOnly".to_string(),
        getter: Some(READONLY_GETTER),
        setter: None,
        is_static: false,
        declaring_type: BASE,
    });
    w.types.insert(BASE, base);

    let mut derived = simple_type(DERIVED, "Derived", Some(BASE));
    derived.fields.push(field("x", DERIVED_X, false, DERIVED));
    derived.fields.push(field("bad", BAD_FIELD, false, DERIVED));
    w.types.insert(DERIVED, derived);
    w.types.insert(STRANGER, simple_type(STRANGER, "Stranger", None));

    w.fields
        .insert((OBJ, BASE_X), RawValue::Primitive(Primitive::Int(1)));
    w.fields
        .insert((OBJ, DERIVED_X), RawValue::Primitive(Primitive::Int(2)));
    w.fields
        .insert((OBJ, BASE_Y), RawValue::Primitive(Primitive::Int(9)));
    w.fields.insert(
        (OBJ, NAME_BACKING),
        RawValue::Primitive(Primitive::String("initial".to_string())),
    );
    w.statics
        .insert((BASE, STATIC_COUNT), RawValue::Primitive(Primitive::Int(5)));
    w.eval_behaviors
        .insert(NAME_GETTER, EvalBehavior::GetBacking(NAME_BACKING));
    w.eval_behaviors
        .insert(NAME_SETTER, EvalBehavior::SetBacking(NAME_BACKING));

    w.chains.insert(
        tid,
        vec![(
            NativeChain {
                handle: ChainHandle(1),
                managed: true,
            },
            vec![NativeFrame {
                handle: FrameHandle(10),
                il: true,
            }],
        )],
    );
    w.symbols.insert(
        FrameHandle(10),
        SymbolInfo {
            function: "Program.Main".to_string(),
            file: "program.cs".to_string(),
            line: 20,
        },
    );
    w.locals.insert(
        FrameHandle(10),
        vec![
            (
                "obj".to_string(),
                RawValue::Object {
                    handle: ObjectHandle(OBJ),
                    type_id: DERIVED,
                },
            ),
            ("nothing".to_string(), RawValue::Null),
            ("n".to_string(), RawValue::Primitive(Primitive::Int(3))),
            (
                "other".to_string(),
                RawValue::Object {
                    handle: ObjectHandle(200),
                    type_id: STRANGER,
                },
            ),
        ],
    );

    drop(w);
    world
}

fn int(value: &mdbg::debugger::variable::Value) -> i64 {
    match value.primitive() {
        Some(Primitive::Int(i)) => *i,
        other => panic!("expected integer primitive, got {other:?}"),
    }
}

#[test]
fn test_read_local_variable() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let obj = debugger.read_value(&Expr::variable("obj")).unwrap();
    assert!(obj.is_object());
    assert_eq!(obj.expr().to_string(), "obj");

    let n = debugger.read_value(&Expr::variable("n")).unwrap();
    assert_eq!(int(&n), 3);
}

#[test]
fn test_unknown_local_variable() {
    let world = value_world();
    let (debugger, _log) = attach(&world);
    assert!(matches!(
        debugger.read_value(&Expr::variable("missing")),
        Err(Error::VariableNotFound(name)) if name == "missing"
    ));
}

#[test]
fn test_derived_field_shadows_base_field() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let x = debugger
        .read_value(&Expr::variable("obj").field("x"))
        .unwrap();
    assert_eq!(int(&x), 2);
    assert_eq!(x.expr().to_string(), "obj.x");
    assert!(x.parent().is_some());
}

#[test]
fn test_base_member_reachable_through_derived() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let y = debugger
        .read_value(&Expr::variable("obj").field("y"))
        .unwrap();
    assert_eq!(int(&y), 9);
}

#[test]
fn test_member_of_null_reference() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let err = debugger
        .read_value(&Expr::variable("nothing").field("x"))
        .unwrap_err();
    assert_eq!(err.to_string(), "Null reference");
}

#[test]
fn test_member_of_primitive_target() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let err = debugger
        .read_value(&Expr::variable("n").field("x"))
        .unwrap_err();
    assert_eq!(err.to_string(), "Target object is not class or value type");
}

#[test]
fn test_instance_field_without_target() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let err = debugger
        .field_value(None, &field("x", BASE_X, false, BASE))
        .unwrap_err();
    assert_eq!(err.to_string(), "No target object specified");
}

#[test]
fn test_field_of_unrelated_type() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let other = Rc::new(debugger.read_value(&Expr::variable("other")).unwrap());
    let err = debugger
        .field_value(Some(&other), &field("x", BASE_X, false, BASE))
        .unwrap_err();
    assert_eq!(err.to_string(), "Object is not of type Base");
}

#[test]
fn test_static_field_with_null_target() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let count = debugger
        .field_value(None, &field("s_count", STATIC_COUNT, true, BASE))
        .unwrap();
    assert_eq!(int(&count), 5);
    // statics resolve against the current frame context
    assert_eq!(
        world.borrow().last_static_frame_ctx,
        Some(FrameHandle(10))
    );
}

#[test]
fn test_write_static_field() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    debugger
        .set_field_value(
            None,
            &field("s_count", STATIC_COUNT, true, BASE),
            &RawValue::Primitive(Primitive::Int(6)),
        )
        .unwrap();
    assert_eq!(
        world.borrow().statics.get(&(BASE, STATIC_COUNT)),
        Some(&RawValue::Primitive(Primitive::Int(6)))
    );
}

#[test]
fn test_field_read_failure_reports_access_error() {
    let world = value_world();
    world.borrow_mut().failing_fields.insert(BAD_FIELD);
    let (debugger, _log) = attach(&world);

    let err = debugger
        .read_value(&Expr::variable("obj").field("bad"))
        .unwrap_err();
    assert_eq!(err.to_string(), "Can not get value of field");
}

#[test]
fn test_member_not_found() {
    let world = value_world();
    let (debugger, _log) = attach(&world);
    assert!(matches!(
        debugger.read_value(&Expr::variable("obj").field("nope")),
        Err(Error::MemberNotFound(name)) if name == "nope"
    ));
}

#[test]
fn test_property_get_set_roundtrip() {
    let world = value_world();
    let (debugger, log) = attach(&world);
    let name_expr = Expr::variable("obj").property("Name");

    let name = debugger.read_value(&name_expr).unwrap();
    assert_eq!(
        name.primitive(),
        Some(&Primitive::String("initial".to_string()))
    );

    debugger
        .write_value(
            &name_expr,
            RawValue::Primitive(Primitive::String("renamed".to_string())),
        )
        .unwrap();
    let name = debugger.read_value(&name_expr).unwrap();
    assert_eq!(
        name.primitive(),
        Some(&Primitive::String("renamed".to_string()))
    );

    // accessor evaluation is a detour within the pause, not a resume
    assert!(log.states_expired.borrow().is_empty());
}

#[test]
fn test_property_without_set_accessor() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    let err = debugger
        .write_value(
            &Expr::variable("obj").property("ReadOnly"),
            RawValue::Primitive(Primitive::Int(1)),
        )
        .unwrap_err();
    assert_eq!(err.to_string(), "Property does not have a set method");
}

#[test]
fn test_write_field_through_expression() {
    let world = value_world();
    let (debugger, _log) = attach(&world);

    debugger
        .write_value(
            &Expr::variable("obj").field("x"),
            RawValue::Primitive(Primitive::Int(42)),
        )
        .unwrap();
    // the write lands on the shadowing derived field
    assert_eq!(
        world.borrow().fields.get(&(OBJ, DERIVED_X)),
        Some(&RawValue::Primitive(Primitive::Int(42)))
    );
    assert_eq!(
        world.borrow().fields.get(&(OBJ, BASE_X)),
        Some(&RawValue::Primitive(Primitive::Int(1)))
    );
}

#[test]
fn test_local_is_not_assignable() {
    let world = value_world();
    let (debugger, _log) = attach(&world);
    assert!(matches!(
        debugger.write_value(
            &Expr::variable("n"),
            RawValue::Primitive(Primitive::Int(0))
        ),
        Err(Error::Access(_))
    ));
}
