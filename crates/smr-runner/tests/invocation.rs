use pretty_assertions::assert_eq;
use serde_json::{json, Map, Value as Json};
use smr_code::opcode::{CO_NEWLOCALS, CO_OPTIMIZED};
use smr_code::{Assembler, CodeDescriptor, Constant, MemorySource, Opcode};
use smr_python::compile_function;
use smr_runner::{
    Arguments, EnvironmentOverlay, InterpreterGeneration, InvocationExecutor,
    ReconstructionEngine, Response,
};
use smr_stackvm::{Value, Vm};

fn compile(source: &str, name: &str) -> CodeDescriptor {
    compile_function(source, "jobs.py", name).expect("compile")
}

fn call(descriptor: &CodeDescriptor, params: Json) -> Response {
    let arguments = Arguments::from_params(&descriptor.qualified_name, params).expect("params");
    InvocationExecutor::default().respond(descriptor, &arguments.args, &arguments.kwargs, None)
}

fn error_code(response: &Response) -> i64 {
    response.error().map(|error| error.code).expect("failure envelope")
}

#[test]
fn hello_world_round_trips_through_a_record() {
    let descriptor = compile("def hello():\n    return 'Hello World!'\n", "hello");
    let record = descriptor.to_record(true);
    let response =
        InvocationExecutor::default().run_record(&record, &[], &Map::new(), Some(json!(1)));
    assert_eq!(
        response.to_record(),
        json!({ "jsonrpc": "2.0", "id": 1, "result": "Hello World!" })
    );
}

#[test]
fn positional_argument_is_formatted() {
    let descriptor = compile("def greet(o):\n    return 'Hello %s!' % o\n", "greet");
    let response = call(&descriptor, json!(["dude"]));
    assert_eq!(response.result(), Some(&json!("Hello dude!")));
}

#[test]
fn unset_free_variable_is_a_name_error() {
    let mut asm = Assembler::new("reader", "jobs.py", 1);
    asm.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
    asm.add_const(smr_code::Constant::None);
    let total = asm.add_freevar("total");
    asm.emit_arg(Opcode::LoadDeref, total);
    asm.emit(Opcode::ReturnValue);
    let descriptor = asm.finish().expect("assemble");

    let response = call(&descriptor, json!([]));
    assert_eq!(error_code(&response), -32000);
    let data = &response.error().expect("failure").data;
    assert_eq!(data["function"], json!("reader"));
    assert_eq!(data["faultInspection"]["__name__"], json!("NameError"));
    assert_eq!(data["faultInspection"]["name"], json!("total"));
    assert!(data["faultInspection"].get("__module__").is_none());
}

#[test]
fn record_without_parameter_count_is_a_parse_error() {
    let mut record = compile("def hello():\n    return 1\n", "hello").to_record(false);
    record.remove("positional_param_count");
    let response = InvocationExecutor::default().run_record(&record, &[], &Map::new(), None);
    assert_eq!(
        response.to_record(),
        json!({
            "jsonrpc": "2.0",
            "error": { "code": -32700, "message": "Parse error.", "data": null },
        })
    );
}

#[test]
fn record_without_bytecode_is_a_parse_error() {
    let mut record = compile("def hello():\n    return 1\n", "hello").to_record(false);
    record.remove("bytecode");
    let response = InvocationExecutor::default().run_record(&record, &[], &Map::new(), None);
    assert_eq!(error_code(&response), -32700);
}

#[test]
fn unknown_locator_is_not_found() {
    let mut source = MemorySource::new();
    let hello = compile("def hello():\n    return 'hi'\n", "hello");
    source.insert("fns/hello.json", Json::Object(hello.to_record(true)).to_string());
    let executor = InvocationExecutor::default();

    let found = executor.run_located(&source, "fns/hello.json", &[], &Map::new(), None);
    assert_eq!(found.result(), Some(&json!("hi")));

    let missing = executor.run_located(&source, "fns/absent.json", &[], &Map::new(), None);
    assert_eq!(error_code(&missing), -32601);
    assert_eq!(
        missing.error().expect("failure").data,
        json!({ "locator": "fns/absent.json" })
    );
}

#[test]
fn falsy_results_are_results() {
    let descriptor = compile("def nothing(flag=False):\n    if flag:\n        return 0\n", "nothing");
    assert_eq!(call(&descriptor, json!([])).result(), Some(&Json::Null));
    assert_eq!(call(&descriptor, json!([true])).result(), Some(&json!(0)));
}

#[test]
fn binding_mismatches_are_runtime_faults() {
    let descriptor = compile("def greet(o, punct='!'):\n    return 'Hello ' + o + punct\n", "greet");
    assert_eq!(
        call(&descriptor, json!({ "o": "you", "punct": "?" })).result(),
        Some(&json!("Hello you?"))
    );

    let response = call(&descriptor, json!([]));
    assert_eq!(error_code(&response), -32000);
    let data = &response.error().expect("failure").data;
    assert_eq!(data["faultInspection"]["__name__"], json!("TypeError"));
    assert_eq!(data["args"], json!([]));
    assert_eq!(data["kwargs"], json!({}));

    let response = call(&descriptor, json!({ "args": ["a"], "kwargs": { "tone": "loud" } }));
    let data = &response.error().expect("failure").data;
    assert_eq!(data["faultInspection"]["__name__"], json!("TypeError"));
    assert_eq!(data["kwargs"], json!({ "tone": "loud" }));
}

#[test]
fn variadic_parameters_collect_extras() {
    let descriptor = compile(
        "def tally(first, *rest, **named):\n    return [first, len(rest), sorted(named)]\n",
        "tally",
    );
    let response = call(
        &descriptor,
        json!({ "args": [1, 2, 3], "kwargs": { "b": 1, "a": 2 } }),
    );
    assert_eq!(response.result(), Some(&json!([1, 2, ["a", "b"]])));
}

#[test]
fn fault_traceback_follows_calls() {
    let descriptor = compile(
        "def ratio(a, b):\n    def divide(x, y):\n        return x / y\n    return divide(a, b)\n",
        "ratio",
    );
    let response = call(&descriptor, json!([1, 0]));
    let data = &response.error().expect("failure").data;
    assert_eq!(data["faultInspection"]["__name__"], json!("ZeroDivisionError"));
    let lines: Vec<&Json> = data["traceback"]
        .as_array()
        .expect("traceback")
        .iter()
        .map(|frame| &frame["line"])
        .collect();
    assert_eq!(lines, vec![&json!(4), &json!(3)]);
}

#[test]
fn overlay_supplies_globals_and_fault_classes() {
    let overlay = EnvironmentOverlay::new()
        .with_global("factor", json!(3))
        .with_fault_class("billing.QuotaExceeded");
    let executor = InvocationExecutor::default().with_overlay(overlay);

    let scaled = compile("def scaled(x):\n    return x * factor\n", "scaled");
    assert_eq!(
        executor.invoke(&scaled, &[json!(5)], &Map::new()).expect("scaled"),
        json!(15)
    );

    let charge = compile(
        "def charge(amount):\n    if amount > factor:\n        raise QuotaExceeded('over by', amount - factor)\n    return amount\n",
        "charge",
    );
    let err = executor
        .invoke(&charge, &[json!(5)], &Map::new())
        .expect_err("quota");
    assert_eq!(
        err.data()["faultInspection"],
        json!({
            "__name__": "QuotaExceeded",
            "__module__": "billing",
            "args": ["over by", 2],
        })
    );
}

#[test]
fn overlay_does_not_leak_between_calls() {
    let descriptor = compile(
        "def bump():\n    global seen\n    seen = seen + 1\n    return seen\n",
        "bump",
    );
    let executor =
        InvocationExecutor::default().with_overlay(EnvironmentOverlay::new().with_global("seen", json!(0)));
    for _ in 0..3 {
        assert_eq!(executor.invoke(&descriptor, &[], &Map::new()).expect("bump"), json!(1));
    }
}

#[test]
fn recursion_is_bounded() {
    let fact = compile(
        "def fact(n):\n    def go(k):\n        return 1 if k <= 1 else k * go(k - 1)\n    return go(n)\n",
        "fact",
    );
    let executor = InvocationExecutor::default().with_max_depth(30);
    assert_eq!(executor.invoke(&fact, &[json!(10)], &Map::new()).expect("fact"), json!(3628800));
    let err = executor
        .invoke(&fact, &[json!(100)], &Map::new())
        .expect_err("too deep");
    assert_eq!(err.data()["faultInspection"]["__name__"], json!("RecursionError"));
}

#[test]
fn top_level_function_is_not_bound_under_its_own_name() {
    let fact = compile(
        "def fact(n):\n    return 1 if n <= 1 else n * fact(n - 1)\n",
        "fact",
    );
    let response = call(&fact, json!([1]));
    assert_eq!(response.result(), Some(&json!(1)));
    let response = call(&fact, json!([3]));
    assert_eq!(error_code(&response), -32000);
    let data = &response.error().expect("failure").data;
    assert_eq!(data["faultInspection"]["__name__"], json!("NameError"));
    assert_eq!(data["faultInspection"]["name"], json!("fact"));
}

#[test]
fn self_containing_result_is_elided() {
    let descriptor = compile(
        "def loop():\n    x = [1]\n    x.append(x)\n    return x\n",
        "loop",
    );
    assert_eq!(call(&descriptor, json!([])).result(), Some(&json!([1, "[...]"])));
}

#[test]
fn comparing_self_containing_lists_is_a_recursion_error() {
    let descriptor = compile(
        "def same():\n    a = []\n    a.append(a)\n    b = []\n    b.append(b)\n    return a == b\n",
        "same",
    );
    let response = call(&descriptor, json!([]));
    assert_eq!(error_code(&response), -32000);
    let data = &response.error().expect("failure").data;
    assert_eq!(data["faultInspection"]["__name__"], json!("RecursionError"));
}

#[test]
fn deeply_nested_values_are_released() {
    let descriptor = compile(
        "def deep(n):\n    x = []\n    for i in range(n):\n        x = [x]\n    return len(x)\n",
        "deep",
    );
    assert_eq!(call(&descriptor, json!([1000000])).result(), Some(&json!(1)));
}

#[test]
fn oversized_parameter_counts_are_a_parse_error() {
    let mut record = compile("def hello():\n    return 1\n", "hello").to_record(false);
    record.insert("positional_param_count".to_string(), json!(u32::MAX));
    record.insert("keyword_only_param_count".to_string(), json!(1));
    let response = InvocationExecutor::default().run_record(&record, &[], &Map::new(), None);
    assert_eq!(error_code(&response), -32700);
}

#[test]
fn live_function_keeps_its_container_default() {
    let outer = compile(
        "def make():\n    def inner(a, b={'k': 1}):\n        return b['k'] + a\n    return inner\n",
        "make",
    );
    let executor = InvocationExecutor::default();
    let make = executor
        .engine()
        .build(&outer, executor.overlay())
        .expect("build");
    let inner = match Vm::new().call_function(&make, vec![], vec![]).expect("make") {
        Value::Function(inner) => inner,
        other => panic!("expected a function, got {}", other.repr()),
    };
    let descriptor = CodeDescriptor::from_callable(&*inner);
    assert_eq!(
        descriptor.default_values,
        vec![Constant::Dict(vec![(Constant::from("k"), Constant::Int(1))])]
    );
    assert_eq!(
        executor.invoke(&descriptor, &[json!(2)], &Map::new()).expect("inner"),
        json!(3)
    );
}

#[test]
fn integers_beyond_64_bits_are_invalid_params() {
    let descriptor = compile("def ident(x):\n    return x\n", "ident");
    let response = call(&descriptor, json!([u64::MAX]));
    assert_eq!(error_code(&response), -32602);
    let response = call(&descriptor, json!({ "kwargs": { "x": [1, u64::MAX] } }));
    assert_eq!(error_code(&response), -32602);
    assert_eq!(call(&descriptor, json!([i64::MAX])).result(), Some(&json!(i64::MAX)));
}

#[test]
fn legacy_generation_rejects_keyword_only_parameters() {
    let descriptor = compile("def pad(text, *, width):\n    return text * width\n", "pad");
    let mut kwargs = Map::new();
    kwargs.insert("width".to_string(), json!(3));
    let legacy = InvocationExecutor::new(ReconstructionEngine::new(InterpreterGeneration::Legacy));
    let err = legacy
        .invoke(&descriptor, &[json!("x")], &kwargs)
        .expect_err("legacy");
    assert_eq!(err.code(), -32700);

    let current = InvocationExecutor::default();
    assert_eq!(
        current.invoke(&descriptor, &[json!("x")], &kwargs).expect("current"),
        json!("xxx")
    );
}
