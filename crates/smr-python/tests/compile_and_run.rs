use std::rc::Rc;

use pretty_assertions::assert_eq;
use smr_python::compile_function;
use smr_stackvm::{
    constant_value, CodeObject, Environment, Function, InterpreterGeneration, Value, Vm,
};

/// Compiles `name` and binds it in a fresh environment under its own name
/// so recursive calls resolve.
fn load(source: &str, name: &str) -> Rc<Function> {
    let descriptor = compile_function(source, "module.py", name).expect("compile");
    let generation = InterpreterGeneration::Current;
    let code = CodeObject::build(generation, &descriptor).expect("build");
    let env = Rc::new(Environment::restricted());
    let mut function = Function::new(code, Rc::clone(&env));
    function.defaults = descriptor
        .default_values
        .iter()
        .map(|constant| constant_value(generation, constant))
        .collect::<Result<_, _>>()
        .expect("defaults");
    let function = Rc::new(function);
    env.set_global(name, Value::Function(Rc::clone(&function)));
    function
}

fn call(function: &Rc<Function>, args: Vec<Value>) -> Value {
    Vm::new()
        .call_function(function, args, Vec::new())
        .expect("call")
}

#[test]
fn recursion_through_globals() {
    let fib = load(
        "def fib(n):\n    if n < 2:\n        return n\n    return fib(n - 1) + fib(n - 2)\n",
        "fib",
    );
    assert!(matches!(call(&fib, vec![Value::Int(15)]), Value::Int(610)));
}

#[test]
fn closures_share_cells_across_calls() {
    let make_counter = load(
        "def make_counter(start=0):\n    count = start\n    def bump(step=1):\n        nonlocal count\n        count += step\n        return count\n    return bump\n",
        "make_counter",
    );
    let mut vm = Vm::new();
    let bump = vm
        .call_function(&make_counter, vec![Value::Int(5)], Vec::new())
        .expect("counter");
    assert!(matches!(vm.call(&bump, Vec::new(), Vec::new()), Ok(Value::Int(6))));
    let stepped = vm
        .call(&bump, Vec::new(), vec![("step".to_string(), Value::Int(4))])
        .expect("bump");
    assert!(matches!(stepped, Value::Int(10)));

    let from_zero = call(&make_counter, Vec::new());
    assert!(matches!(vm.call(&from_zero, Vec::new(), Vec::new()), Ok(Value::Int(1))));
}

#[test]
fn nested_loops_with_break_and_else() {
    let primes = load(
        r#"
def primes(limit):
    found = []
    for n in range(2, limit):
        for d in found:
            if n % d == 0:
                break
        else:
            found.append(n)
    return found
"#,
        "primes",
    );
    assert_eq!(
        call(&primes, vec![Value::Int(20)]).repr(),
        "[2, 3, 5, 7, 11, 13, 17, 19]"
    );
}

#[test]
fn while_loops_and_formatted_strings() {
    let describe = load(
        r#"
def describe(name, scores):
    """Summarizes the non-negative scores."""
    total = 0
    i = 0
    while i < len(scores):
        s = scores[i]
        i += 1
        if s < 0:
            continue
        total += s
    avg = total / len(scores)
    return f"{name!r}: {total} pts, avg {avg:.2f}"
"#,
        "describe",
    );
    let scores = Value::list(vec![Value::Int(3), Value::Int(-1), Value::Int(4)]);
    let text = call(&describe, vec![Value::from("ada"), scores]);
    assert_eq!(text.to_text(), "'ada': 7 pts, avg 2.33");
}

#[test]
fn unpacking_subscripts_and_lambdas() {
    let rank = load(
        r#"
def rank(pairs, top=2):
    table = {}
    for name, score in pairs:
        table[name] = table.get(name, 0) + score
    ordered = sorted(table.items(), key=lambda kv: -kv[1])
    names = []
    for name, _ in ordered[:top]:
        names.append(name)
    return names
"#,
        "rank",
    );
    let pair = |name: &str, score: i64| Value::tuple(vec![Value::from(name), Value::Int(score)]);
    let pairs = Value::list(vec![pair("a", 1), pair("b", 5), pair("a", 7), pair("c", 2)]);
    assert_eq!(call(&rank, vec![pairs]).repr(), "['a', 'b']");
}

#[test]
fn conditions_short_circuit() {
    let classify = load(
        "def classify(x):\n    return 'mid' if 0 < x <= 10 and not x == 5 else 'edge'\n",
        "classify",
    );
    let labels: Vec<String> = [3, 5, 11, 0]
        .into_iter()
        .map(|x| call(&classify, vec![Value::Int(x)]).to_text())
        .collect();
    assert_eq!(labels, vec!["mid", "edge", "edge", "edge"]);
}

#[test]
fn failed_assertions_raise_with_their_message() {
    let positive = load(
        "def positive(x):\n    assert x > 0, 'x must be positive'\n    return x\n",
        "positive",
    );
    assert!(matches!(call(&positive, vec![Value::Int(2)]), Value::Int(2)));
    let err = Vm::new()
        .call_function(&positive, vec![Value::Int(-2)], Vec::new())
        .expect_err("assertion");
    assert_eq!(err.to_string(), "AssertionError: x must be positive");
}

#[test]
fn raised_faults_point_at_the_source_line() {
    let check = load(
        "def check(x):\n    if x > 3:\n        raise ValueError('too big: %d' % x)\n    return x\n",
        "check",
    );
    let err = Vm::new()
        .call_function(&check, vec![Value::Int(5)], Vec::new())
        .expect_err("raises");
    assert_eq!(err.to_string(), "ValueError: too big: 5");
    let lines: Vec<u32> = err.fault.traceback().iter().map(|frame| frame.line).collect();
    assert_eq!(lines, vec![3]);
}
