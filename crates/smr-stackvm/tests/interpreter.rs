use std::rc::Rc;

use pretty_assertions::assert_eq;
use smr_code::opcode::{CO_NESTED, CO_NEWLOCALS, CO_OPTIMIZED, MAKE_FUNCTION_CLOSURE};
use smr_code::{Assembler, CodeDescriptor, Constant, Opcode};
use smr_stackvm::{
    CodeObject, Environment, Function, InterpreterGeneration, TraceFrame, Value, Vm,
};

fn assembler(name: &str, first_line: u32, params: &[&str]) -> Assembler {
    let mut asm = Assembler::new(name, "module.py", first_line);
    asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
    asm.set_parameters(params.len() as u32, 0);
    for param in params {
        asm.add_varname(param);
    }
    asm
}

fn load(descriptor: &CodeDescriptor, env: &Rc<Environment>) -> Rc<Function> {
    let code = CodeObject::build(InterpreterGeneration::Current, descriptor).expect("build");
    Rc::new(Function::new(code, Rc::clone(env)))
}

#[test]
fn closures_capture_cells() {
    let mut inner = Assembler::new("outer.<locals>.inner", "module.py", 2);
    inner.set_flags(CO_OPTIMIZED | CO_NEWLOCALS | CO_NESTED);
    let x = inner.add_freevar("x");
    inner.emit_arg(Opcode::LoadDeref, x);
    inner.emit(Opcode::ReturnValue);
    let inner = inner.finish().expect("inner");

    let mut outer = assembler("outer", 1, &["x"]);
    let cell = outer.add_cellvar("x");
    let slot = outer.add_varname("inner");
    let code = outer.add_const(Constant::from(inner));
    let name = outer.add_const("outer.<locals>.inner");
    outer.emit_arg(Opcode::LoadClosure, cell);
    outer.emit_arg(Opcode::BuildTuple, 1);
    outer.emit_arg(Opcode::LoadConst, code);
    outer.emit_arg(Opcode::LoadConst, name);
    outer.emit_arg(Opcode::MakeFunction, MAKE_FUNCTION_CLOSURE);
    outer.emit_arg(Opcode::StoreFast, slot);
    outer.emit_arg(Opcode::LoadFast, slot);
    outer.emit(Opcode::ReturnValue);
    let outer = load(&outer.finish().expect("outer"), &Rc::new(Environment::restricted()));

    let mut vm = Vm::new();
    let made = vm
        .call_function(&outer, vec![Value::Int(5)], Vec::new())
        .expect("outer");
    assert_eq!(made.repr(), "<function outer.<locals>.inner>");
    let value = vm.call(&made, Vec::new(), Vec::new()).expect("inner");
    assert!(matches!(value, Value::Int(5)));
}

#[test]
fn loops_accumulate_in_place() {
    let mut asm = assembler("total", 1, &["items"]);
    let acc = asm.add_varname("acc");
    let item = asm.add_varname("item");
    let zero = asm.add_const(0i64);
    asm.emit_arg(Opcode::LoadConst, zero);
    asm.emit_arg(Opcode::StoreFast, acc);
    asm.emit_arg(Opcode::LoadFast, 0);
    asm.emit(Opcode::GetIter);
    let top = asm.new_label();
    let done = asm.new_label();
    asm.bind(top);
    asm.emit_jump(Opcode::ForIter, done);
    asm.emit_arg(Opcode::StoreFast, item);
    asm.emit_arg(Opcode::LoadFast, acc);
    asm.emit_arg(Opcode::LoadFast, item);
    asm.emit(Opcode::InplaceAdd);
    asm.emit_arg(Opcode::StoreFast, acc);
    asm.emit_jump(Opcode::JumpAbsolute, top);
    asm.bind(done);
    asm.emit_arg(Opcode::LoadFast, acc);
    asm.emit(Opcode::ReturnValue);
    let total = load(&asm.finish().expect("total"), &Rc::new(Environment::restricted()));

    let items = Value::list((1..=4).map(Value::Int).collect());
    let value = Vm::new()
        .call_function(&total, vec![items], Vec::new())
        .expect("total");
    assert!(matches!(value, Value::Int(10)));
}

#[test]
fn method_calls_and_formatted_strings() {
    let mut asm = assembler("greet", 1, &["name"]);
    let upper = asm.add_name("upper");
    let bang = asm.add_const("!");
    asm.emit_arg(Opcode::LoadFast, 0);
    asm.emit_arg(Opcode::LoadMethod, upper);
    asm.emit_arg(Opcode::CallMethod, 0);
    asm.emit_arg(Opcode::FormatValue, 0);
    asm.emit_arg(Opcode::LoadConst, bang);
    asm.emit_arg(Opcode::BuildString, 2);
    asm.emit(Opcode::ReturnValue);
    let greet = load(&asm.finish().expect("greet"), &Rc::new(Environment::restricted()));

    let value = Vm::new()
        .call_function(&greet, Vec::new(), vec![("name".to_string(), Value::from("ada"))])
        .expect("greet");
    assert_eq!(value.to_text(), "ADA!");
}

#[test]
fn raised_faults_record_every_frame() {
    let env = Rc::new(Environment::restricted());

    let mut check = assembler("check", 1, &["n"]);
    check.set_line(2);
    let class = check.add_name("ValueError");
    let template = check.add_const("bad %d");
    check.emit_arg(Opcode::LoadGlobal, class);
    check.emit_arg(Opcode::LoadConst, template);
    check.emit_arg(Opcode::LoadFast, 0);
    check.emit(Opcode::BinaryModulo);
    check.emit_arg(Opcode::CallFunction, 1);
    check.emit_arg(Opcode::RaiseVarargs, 1);
    let check = load(&check.finish().expect("check"), &env);
    env.set_global("check", Value::Function(check));

    let mut caller = assembler("caller", 4, &[]);
    caller.set_line(5);
    let callee = caller.add_name("check");
    let three = caller.add_const(3i64);
    caller.emit_arg(Opcode::LoadGlobal, callee);
    caller.emit_arg(Opcode::LoadConst, three);
    caller.emit_arg(Opcode::CallFunction, 1);
    caller.emit(Opcode::ReturnValue);
    let caller = load(&caller.finish().expect("caller"), &env);

    let err = Vm::new()
        .call_function(&caller, Vec::new(), Vec::new())
        .expect_err("raises");
    assert_eq!(err.to_string(), "ValueError: bad 3");
    let frame = |name: &str, line| TraceFrame {
        filename: "module.py".to_string(),
        name: name.to_string(),
        line,
    };
    assert_eq!(err.fault.traceback(), vec![frame("caller", 5), frame("check", 2)]);
    env.delete_global("check");
}

#[test]
fn reading_an_unassigned_local_is_an_unbound_local_error() {
    let mut asm = assembler("early", 1, &[]);
    let late = asm.add_varname("late");
    asm.emit_arg(Opcode::LoadFast, late);
    asm.emit(Opcode::ReturnValue);
    let early = load(&asm.finish().expect("early"), &Rc::new(Environment::restricted()));
    let err = Vm::new()
        .call_function(&early, Vec::new(), Vec::new())
        .expect_err("unbound");
    assert_eq!(
        err.to_string(),
        "UnboundLocalError: local variable 'late' referenced before assignment"
    );
}
