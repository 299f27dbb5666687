//! Call-protocol behavior through the public API: binding rules, closures,
//! lazy parameters, property slots, and embedder re-entry.

use pretty_assertions::assert_eq;
use septvm::{
    CallArg, CodeBuilder, ExcType, Machine, ModuleBuilder, Opcode, ParamFlags, ParamImage, Value,
};

fn eager(name: u16) -> ParamImage {
    ParamImage {
        name,
        flags: ParamFlags::default(),
        default_block: None,
    }
}

/// Emits `receiver.op(arg)` assuming the argument is already on the stack
/// below the receiver-producing instruction the caller emitted.
fn emit_binary(body: &mut CodeBuilder, op: u16) {
    body.emit_u16(Opcode::FetchProp, op).call(&[CallArg::positional()]);
}

#[test]
fn rest_absorbs_leftover_positional_arguments() {
    // f(a, b = 10, rest r) { r.length + (a + b) }
    let mut module = ModuleBuilder::new("binding");
    let name_f = module.constant_str("f");
    let a = module.constant_str("a");
    let b = module.constant_str("b");
    let r = module.constant_str("r");
    let plus = module.constant_str("+");
    let length = module.constant_str("length");
    let one = module.constant_int(1);
    let c2 = module.constant_int(2);
    let c3 = module.constant_int(3);
    let c4 = module.constant_int(4);

    // Block 0: body - define f, then return f(1) + 100 * nothing... keep it
    // simple: return f(1, 2, 3, 4); a second module re-checks f(1).
    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::PushConst, one)
        .emit_u16(Opcode::PushConst, c2)
        .emit_u16(Opcode::PushConst, c3)
        .emit_u16(Opcode::PushConst, c4)
        .emit_u16(Opcode::PushLocal, name_f)
        .call(&[
            CallArg::positional(),
            CallArg::positional(),
            CallArg::positional(),
            CallArg::positional(),
        ])
        .emit(Opcode::Return);
    module.block(body);

    // Block 1: f's body - (b + a) then (r.length + sum).
    let mut f_body = CodeBuilder::new();
    f_body
        .param(eager(a))
        .param(ParamImage {
            name: b,
            flags: ParamFlags::HAS_DEFAULT,
            default_block: Some(2),
        })
        .param(ParamImage {
            name: r,
            flags: ParamFlags::REST,
            default_block: None,
        });
    f_body.emit_u16(Opcode::PushLocal, b).emit_u16(Opcode::PushLocal, a);
    emit_binary(&mut f_body, plus);
    f_body.emit_u16(Opcode::PushLocal, r);
    f_body.emit_u16(Opcode::FetchProp, length).call(&[]);
    emit_binary(&mut f_body, plus);
    f_body.emit(Opcode::Return);
    module.block(f_body);

    // Block 2: default thunk for b.
    let ten = module.constant_int(10);
    let mut default_body = CodeBuilder::new();
    default_body.emit_u16(Opcode::PushConst, ten).emit(Opcode::Return);
    module.block(default_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    // f(1, 2, 3, 4): a=1, b=2, r=[3, 4] -> 1 + 2 + 2
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(5));
}

#[test]
fn default_thunks_fill_missing_parameters() {
    // f(a, b = 10) { a + b } called as f(1) -> 11
    let mut module = ModuleBuilder::new("defaults");
    let name_f = module.constant_str("f");
    let a = module.constant_str("a");
    let b = module.constant_str("b");
    let plus = module.constant_str("+");
    let one = module.constant_int(1);
    let ten = module.constant_int(10);

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::PushConst, one)
        .emit_u16(Opcode::PushLocal, name_f)
        .call(&[CallArg::positional()])
        .emit(Opcode::Return);
    module.block(body);

    let mut f_body = CodeBuilder::new();
    f_body.param(eager(a)).param(ParamImage {
        name: b,
        flags: ParamFlags::HAS_DEFAULT,
        default_block: Some(2),
    });
    f_body.emit_u16(Opcode::PushLocal, b).emit_u16(Opcode::PushLocal, a);
    emit_binary(&mut f_body, plus);
    f_body.emit(Opcode::Return);
    module.block(f_body);

    let mut default_body = CodeBuilder::new();
    default_body.emit_u16(Opcode::PushConst, ten).emit(Opcode::Return);
    module.block(default_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(11));
}

#[test]
fn a_missing_parameter_without_a_default_is_ewrongarguments() {
    // f(a) called with no arguments.
    let mut module = ModuleBuilder::new("missing-arg");
    let name_f = module.constant_str("f");
    let a = module.constant_str("a");

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::PushLocal, name_f).call(&[]).emit(Opcode::Return);
    module.block(body);

    let mut f_body = CodeBuilder::new();
    f_body.param(eager(a));
    f_body.emit_u16(Opcode::PushLocal, a).emit(Opcode::Return);
    module.block(f_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    let exc = machine.run_module(id).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EWrongArguments);
    assert_eq!(exc.message(), "Required parameter 'a' was not provided.");
}

#[test]
fn named_arguments_bind_out_of_order() {
    // f(a, b) { a - b } called as f(b: 10, a: 1) -> -9
    let mut module = ModuleBuilder::new("named");
    let name_f = module.constant_str("f");
    let a = module.constant_str("a");
    let b = module.constant_str("b");
    let minus = module.constant_str("-");
    let ten = module.constant_int(10);
    let one = module.constant_int(1);

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::PushConst, ten)
        .emit_u16(Opcode::PushConst, one)
        .emit_u16(Opcode::PushLocal, name_f)
        .call(&[CallArg::named(b), CallArg::named(a)])
        .emit(Opcode::Return);
    module.block(body);

    let mut f_body = CodeBuilder::new();
    f_body.param(eager(a)).param(eager(b));
    f_body.emit_u16(Opcode::PushLocal, b).emit_u16(Opcode::PushLocal, a);
    emit_binary(&mut f_body, minus);
    f_body.emit(Opcode::Return);
    module.block(f_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(-9));
}

#[test]
fn closures_capture_their_defining_scope() {
    // makeAdder(n) { fn(m) { n + m } }; makeAdder(5)(3) == 8
    let mut module = ModuleBuilder::new("closures");
    let make_adder = module.constant_str("makeAdder");
    let add5 = module.constant_str("add5");
    let n = module.constant_str("n");
    let m = module.constant_str("m");
    let plus = module.constant_str("+");
    let five = module.constant_int(5);
    let three = module.constant_int(3);

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(make_adder, 0);
    body.emit_u16(Opcode::PushConst, five)
        .emit_u16(Opcode::PushLocal, make_adder)
        .call(&[CallArg::positional()])
        .create_slot(add5, 0);
    body.emit_u16(Opcode::PushConst, three)
        .emit_u16(Opcode::PushLocal, add5)
        .call(&[CallArg::positional()])
        .emit(Opcode::Return);
    module.block(body);

    let mut outer = CodeBuilder::new();
    outer.param(eager(n));
    outer.emit_u16(Opcode::CreateFunc, 2).emit(Opcode::Return);
    module.block(outer);

    let mut inner = CodeBuilder::new();
    inner.param(eager(m));
    inner.emit_u16(Opcode::PushLocal, m).emit_u16(Opcode::PushLocal, n);
    emit_binary(&mut inner, plus);
    inner.emit(Opcode::Return);
    module.block(inner);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(8));
}

#[test]
fn lazy_parameters_evaluate_only_when_forced_and_every_time() {
    // count = 0; f(lazy t) { force(t); force(t) }; f(lazy: count += 1).
    // Reading t never evaluates; two forces mean count == 2.
    let mut module = ModuleBuilder::new("lazy");
    let count = module.constant_str("count");
    let name_f = module.constant_str("f");
    let t = module.constant_str("t");
    let force = module.constant_str("force");
    let plus = module.constant_str("+");
    let zero = module.constant_int(0);
    let one = module.constant_int(1);

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushConst, zero).create_slot(count, 0);
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::Lazy, 2)
        .emit_u16(Opcode::PushLocal, name_f)
        .call(&[CallArg::lazy()])
        .emit(Opcode::Pop);
    body.emit_u16(Opcode::PushLocal, count).emit(Opcode::Return);
    module.block(body);

    // Block 1: f - reads t (no evaluation), then forces it twice.
    let mut f_body = CodeBuilder::new();
    f_body.param(ParamImage {
        name: t,
        flags: ParamFlags::LAZY,
        default_block: None,
    });
    f_body.emit_u16(Opcode::PushLocal, t).emit(Opcode::Pop);
    for _ in 0..2 {
        f_body
            .emit_u16(Opcode::PushLocal, t)
            .emit_u16(Opcode::PushLocal, force)
            .call(&[CallArg::positional()])
            .emit(Opcode::Pop);
    }
    f_body.emit_u16(Opcode::PushLocal, t).emit(Opcode::Return);
    module.block(f_body);

    // Block 2: the thunk - count = count + 1; count
    let mut thunk = CodeBuilder::new();
    thunk
        .emit_u16(Opcode::PushConst, one)
        .emit_u16(Opcode::PushLocal, count);
    emit_binary(&mut thunk, plus);
    thunk
        .emit_u16(Opcode::StoreLocal, count)
        .emit_u16(Opcode::PushLocal, count)
        .emit(Opcode::Return);
    module.block(thunk);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(2));
}

#[test]
fn an_unforced_lazy_parameter_never_evaluates() {
    let mut module = ModuleBuilder::new("lazy-unforced");
    let count = module.constant_str("count");
    let name_f = module.constant_str("f");
    let t = module.constant_str("t");
    let zero = module.constant_int(0);
    let one = module.constant_int(1);

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::PushConst, zero).create_slot(count, 0);
    body.emit_u16(Opcode::CreateFunc, 1).create_slot(name_f, 0);
    body.emit_u16(Opcode::Lazy, 2)
        .emit_u16(Opcode::PushLocal, name_f)
        .call(&[CallArg::lazy()])
        .emit(Opcode::Pop);
    body.emit_u16(Opcode::PushLocal, count).emit(Opcode::Return);
    module.block(body);

    // f reads the thunk but never forces it.
    let mut f_body = CodeBuilder::new();
    f_body.param(ParamImage {
        name: t,
        flags: ParamFlags::LAZY,
        default_block: None,
    });
    f_body.emit_u16(Opcode::PushLocal, t).emit(Opcode::Return);
    module.block(f_body);

    let mut thunk = CodeBuilder::new();
    thunk.emit_u16(Opcode::PushConst, one).emit_u16(Opcode::StoreLocal, count);
    thunk.emit_u16(Opcode::PushLocal, count).emit(Opcode::Return);
    module.block(thunk);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(0));
}

#[test]
fn embedders_reenter_through_invoke() {
    // The module returns a function; the embedder calls it directly.
    let mut module = ModuleBuilder::new("reentry");
    let a = module.constant_str("a");
    let b = module.constant_str("b");
    let minus = module.constant_str("-");

    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).emit(Opcode::Return);
    module.block(body);

    let mut f_body = CodeBuilder::new();
    f_body.param(eager(a)).param(eager(b));
    f_body.emit_u16(Opcode::PushLocal, b).emit_u16(Opcode::PushLocal, a);
    emit_binary(&mut f_body, minus);
    f_body.emit(Opcode::Return);
    module.block(f_body);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    let function = machine.run_module(id).unwrap();

    assert_eq!(machine.invoke(function, &[Value::Int(2), Value::Int(3)]).unwrap(), Value::Int(-1));

    // An exception escaping the nested call surfaces as Err.
    let exc = machine.invoke(function, &[Value::Int(2)]).unwrap_err();
    assert_eq!(exc.exc_type(), ExcType::EWrongArguments);
}

#[test]
fn property_slots_run_getters_and_setters() {
    // d.answer is a property backed by a getter; reading it calls the getter.
    let mut module = ModuleBuilder::new("props");
    let mut body = CodeBuilder::new();
    body.emit_u16(Opcode::CreateFunc, 1).emit(Opcode::Return);
    module.block(body);

    let forty_two = module.constant_int(42);
    let mut getter = CodeBuilder::new();
    getter.emit_u16(Opcode::PushConst, forty_two).emit(Opcode::Return);
    module.block(getter);

    let mut machine = Machine::new();
    let id = machine.install_module(module.build()).unwrap();
    let getter_fn = machine.run_module(id).unwrap();

    let d = machine.make_object(&[]).unwrap();
    machine
        .define_property(d.heap_id().unwrap(), "answer", getter_fn, None)
        .unwrap();
    machine.define_global("d", d);

    let mut reader = ModuleBuilder::new("props-read");
    let name_d = reader.constant_str("d");
    let answer = reader.constant_str("answer");
    let mut read_body = CodeBuilder::new();
    read_body
        .emit_u16(Opcode::PushLocal, name_d)
        .emit_u16(Opcode::FetchProp, answer)
        .emit(Opcode::Return);
    reader.block(read_body);

    let read_id = machine.install_module(reader.build()).unwrap();
    assert_eq!(machine.run_module(read_id).unwrap(), Value::Int(42));
}

#[test]
fn property_writes_copy_down_onto_the_receiver() {
    // Writing through a child leaves the prototype untouched.
    let mut machine = Machine::new();
    let proto = machine.make_object(&[]).unwrap();
    machine.define(proto.heap_id().unwrap(), "x", Value::Int(1)).unwrap();
    let child = machine.make_object(&[proto]).unwrap();
    machine.define_global("proto", proto);
    machine.define_global("child", child);

    let mut module = ModuleBuilder::new("copy-down");
    let name_child = module.constant_str("child");
    let name_proto = module.constant_str("proto");
    let x = module.constant_str("x");
    let two = module.constant_int(2);

    let mut body = CodeBuilder::new();
    // child.x = 2
    body.emit_u16(Opcode::PushLocal, name_child)
        .emit_u16(Opcode::PushConst, two)
        .emit_u16(Opcode::StoreProp, x);
    // return proto.x (must still be 1)
    body.emit_u16(Opcode::PushLocal, name_proto)
        .emit_u16(Opcode::FetchProp, x)
        .emit(Opcode::Return);
    module.block(body);

    let id = machine.install_module(module.build()).unwrap();
    assert_eq!(machine.run_module(id).unwrap(), Value::Int(1));

    // And the child sees its own copy.
    let mut check = ModuleBuilder::new("copy-down-check");
    let name_child = check.constant_str("child");
    let x = check.constant_str("x");
    let mut check_body = CodeBuilder::new();
    check_body
        .emit_u16(Opcode::PushLocal, name_child)
        .emit_u16(Opcode::FetchProp, x)
        .emit(Opcode::Return);
    check.block(check_body);
    let check_id = machine.install_module(check.build()).unwrap();
    assert_eq!(machine.run_module(check_id).unwrap(), Value::Int(2));
}
