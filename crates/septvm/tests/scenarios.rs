//! End-to-end scenarios driven through the public API: bytecode built with
//! the module builder, executed on a freshly bootstrapped machine.

use pretty_assertions::assert_eq;
use septvm::{CallArg, CodeBuilder, ExcType, Machine, ModuleBuilder, Opcode, Value};

fn run_fresh(module: septvm::ModuleImage) -> Result<Value, septvm::Exception> {
    let mut machine = Machine::new();
    let id = machine.install_module(module).expect("module should install");
    machine.run_module(id)
}

#[test]
fn arithmetic_through_the_integer_prototype() {
    // PUSH_CONST 2; PUSH_CONST 3; FETCH_PROP "+"; CALL 1 => Integer(5)
    let mut module = ModuleBuilder::new("arithmetic");
    let two = module.constant_int(2);
    let three = module.constant_int(3);
    let plus = module.constant_str("+");

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushConst, two)
        .emit_u16(Opcode::PushConst, three)
        .emit_u16(Opcode::FetchProp, plus)
        .call(&[CallArg::positional()])
        .emit(Opcode::Return);
    module.block(body);

    assert_eq!(run_fresh(module.build()).unwrap(), Value::Int(5));
}

#[test]
fn method_dispatch_through_a_prototype() {
    // B defines method greet() -> "hi"; A spawns from B; a.greet() == "hi".
    let mut module = ModuleBuilder::new("dispatch");
    let object = module.constant_str("Object");
    let spawn = module.constant_str("spawn");
    let set_method = module.constant_str("setMethod");
    let name_b = module.constant_str("B");
    let name_a = module.constant_str("A");
    let greet = module.constant_str("greet");
    let hi = module.constant_str("hi");

    let mut body = CodeBuilder::new();
    // B = Object.spawn()
    body.emit_u16(Opcode::PushLocal, object)
        .emit_u16(Opcode::FetchProp, spawn)
        .call(&[])
        .create_slot(name_b, 0);
    // B.setMethod("greet", fn() { "hi" })
    body.emit_u16(Opcode::PushConst, greet)
        .emit_u16(Opcode::CreateFunc, 1)
        .emit_u16(Opcode::PushLocal, name_b)
        .emit_u16(Opcode::FetchProp, set_method)
        .call(&[CallArg::positional(), CallArg::positional()])
        .emit(Opcode::Pop);
    // A = B.spawn()
    body.emit_u16(Opcode::PushLocal, name_b)
        .emit_u16(Opcode::FetchProp, spawn)
        .call(&[])
        .create_slot(name_a, 0);
    // A.greet()
    body.emit_u16(Opcode::PushLocal, name_a)
        .emit_u16(Opcode::FetchProp, greet)
        .call(&[])
        .emit(Opcode::Return);
    module.block(body);

    let mut greet_body = CodeBuilder::new();
    greet_body.emit_u16(Opcode::PushConst, hi).emit(Opcode::Return);
    module.block(greet_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    let result = machine.run_module(id).unwrap();
    assert_eq!(machine.display(result), "hi");
}

#[test]
fn diamond_resolution_prefers_the_left_prototype() {
    // D spawns from [B, C]; both define `tag`; C3 gives B's value.
    let mut machine = Machine::new();
    let a = machine.make_object(&[]).unwrap();
    let b = machine.make_object(&[a]).unwrap();
    let c = machine.make_object(&[a]).unwrap();
    machine.define(b.heap_id().unwrap(), "tag", Value::Int(1)).unwrap();
    machine.define(c.heap_id().unwrap(), "tag", Value::Int(2)).unwrap();
    let d = machine.make_object(&[b, c]).unwrap();
    machine.define_global("d", d);

    let mut module = ModuleBuilder::new("diamond");
    let name_d = module.constant_str("d");
    let tag = module.constant_str("tag");
    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushLocal, name_d)
        .emit_u16(Opcode::FetchProp, tag)
        .emit(Opcode::Return);
    module.block(body);

    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(1));
}

#[test]
fn a_handler_catches_and_truncates_to_its_recorded_depth() {
    // Push a sentinel, install a handler, litter the stack, raise. The
    // handler must see exactly [sentinel, exception].
    let mut module = ModuleBuilder::new("catch");
    let sentinel = module.constant_int(99);
    let junk = module.constant_int(11);
    let wrong_type = module.constant_str("EWrongType");

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushConst, sentinel);
    let handler = body.push_handler();
    body.emit_u16(Opcode::PushConst, junk)
        .emit_u16(Opcode::PushConst, junk)
        .emit_u16(Opcode::PushLocal, wrong_type)
        .emit(Opcode::Raise);
    body.patch(handler);
    // Handler entry: drop the exception; the sentinel must be on top.
    body.emit(Opcode::Pop).emit(Opcode::Return);
    module.block(body);

    assert_eq!(run_fresh(module.build()).unwrap(), Value::Int(99));
}

#[test]
fn an_uncaught_exception_reaches_the_embedder() {
    let mut module = ModuleBuilder::new("uncaught");
    let wrong_type = module.constant_str("EWrongType");
    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushLocal, wrong_type).emit(Opcode::Raise);
    module.block(body);

    let exc = run_fresh(module.build()).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EWrongType);
}

#[test]
fn a_missing_property_raises_and_escapes_with_its_message() {
    let mut module = ModuleBuilder::new("missing");
    let boom = module.constant_str("boom");
    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushLocal, boom).emit(Opcode::Return);
    module.block(body);

    let exc = run_fresh(module.build()).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EMissingProperty);
    assert_eq!(exc.message(), "Property 'boom' does not exist.");
}

#[test]
fn forced_collection_returns_the_heap_to_its_baseline() {
    let mut machine = Machine::new();

    // A module whose body churns out temporary strings and returns 0.
    let mut module = ModuleBuilder::new("churn");
    let count = module.constant_int(50);
    let zero = module.constant_int(0);
    let one = module.constant_int(1);
    let gt = module.constant_str(">");
    let minus = module.constant_str("-");
    let to_string = module.constant_str("toString");
    let i = module.constant_str("i");

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushConst, count).create_slot(i, 0);
    let loop_start = body.here();
    // i > 0 ?
    body.emit_u16(Opcode::PushConst, zero)
        .emit_u16(Opcode::PushLocal, i)
        .emit_u16(Opcode::FetchProp, gt)
        .call(&[CallArg::positional()]);
    let done = body.branch(Opcode::BranchIfNot);
    // i.toString() (discarded garbage)
    body.emit_u16(Opcode::PushLocal, i)
        .emit_u16(Opcode::FetchProp, to_string)
        .call(&[])
        .emit(Opcode::Pop);
    // i = i - 1
    body.emit_u16(Opcode::PushConst, one)
        .emit_u16(Opcode::PushLocal, i)
        .emit_u16(Opcode::FetchProp, minus)
        .call(&[CallArg::positional()])
        .emit_u16(Opcode::StoreLocal, i);
    body.branch_to(Opcode::Branch, loop_start);
    body.patch(done);
    body.emit_u16(Opcode::PushLocal, i).emit(Opcode::Return);
    module.block(body);

    let id = machine.install_module(module.build()).unwrap();
    machine.collect_garbage();
    let baseline = machine.heap_stats().live_objects;

    assert_eq!(machine.run_module(id).unwrap(), Value::Int(0));
    // The run left garbage behind (frames, call scopes, strings)...
    assert!(machine.heap_stats().live_objects > baseline);
    // ...and one forced cycle reclaims every object not reachable from the
    // roots, restoring the pre-run count exactly. The loop variable lives in
    // the module scope, which survives as a root.
    machine.collect_garbage();
    assert_eq!(machine.heap_stats().live_objects, baseline);
}
