use pretty_assertions::assert_eq;
use smr_code::opcode::{CO_NESTED, CO_NEWLOCALS, CO_OPTIMIZED, MAKE_FUNCTION_DEFAULTS};
use smr_code::{
    Assembler, CodeDescriptor, CodeError, CompiledCallable, Constant, FieldError, Opcode, Record,
    Schema, SchemaValidator,
};

fn nested_descriptor() -> CodeDescriptor {
    let mut inner = Assembler::new("outer.<locals>.inner", "nested.py", 3);
    inner.set_flags(CO_OPTIMIZED | CO_NEWLOCALS | CO_NESTED);
    inner.set_parameters(1, 0);
    let x = inner.add_varname("x");
    inner.add_const(Constant::None);
    inner.set_line(4);
    inner.emit_arg(Opcode::LoadFast, x);
    inner.emit(Opcode::ReturnValue);
    let inner = inner.finish().expect("inner");

    let mut outer = Assembler::new("outer", "nested.py", 1);
    outer.set_flags(CO_OPTIMIZED | CO_NEWLOCALS);
    outer.set_parameters(1, 2);
    for name in ["a", "b", "c"] {
        outer.add_varname(name);
    }
    outer.set_defaults(vec![Constant::Int(5)]);
    outer.add_const(Constant::None);
    let defaults = outer.add_const(Constant::Tuple(vec![Constant::Float(1.5)]));
    let code = outer.add_const(inner);
    let name = outer.add_const("outer.<locals>.inner");
    outer.set_line(2);
    outer.emit_arg(Opcode::LoadConst, defaults);
    outer.emit_arg(Opcode::LoadConst, code);
    outer.emit_arg(Opcode::LoadConst, name);
    outer.emit_arg(Opcode::MakeFunction, MAKE_FUNCTION_DEFAULTS);
    outer.emit(Opcode::ReturnValue);
    outer.finish().expect("outer")
}

#[test]
fn nested_code_round_trips_through_records() {
    let descriptor = nested_descriptor();
    assert_eq!(descriptor.evaluation_stack_size, 3);
    let record = descriptor.to_record(true);
    let again = CodeDescriptor::from_record(&record).expect("round trip");
    assert_eq!(again, descriptor);

    let text = serde_json::to_string(&record).expect("text");
    let parsed = CodeDescriptor::from_json(&text).expect("from text");
    assert_eq!(parsed, descriptor);
}

#[test]
fn wire_minimal_form_drops_defaults() {
    let descriptor = nested_descriptor();
    let minimal = CodeDescriptor::from_record(&descriptor.to_record(false)).expect("minimal");
    assert!(minimal.default_values.is_empty());
    assert_eq!(minimal.bytecode, descriptor.bytecode);
}

struct Recorded {
    code: CodeDescriptor,
    defaults: Vec<Constant>,
}

impl CompiledCallable for Recorded {
    fn code_descriptor(&self) -> CodeDescriptor {
        self.code.clone()
    }

    fn default_constants(&self) -> Vec<Constant> {
        self.defaults.clone()
    }
}

#[test]
fn introspection_takes_live_defaults() {
    let mut code = nested_descriptor();
    code.default_values.clear();
    let callable = Recorded {
        code,
        defaults: vec![Constant::from("late")],
    };
    let descriptor = CodeDescriptor::from_callable(&callable);
    assert_eq!(descriptor.default_values, vec![Constant::from("late")]);
    assert!(descriptor.is_normalized());
}

struct RejectAll;

impl SchemaValidator for RejectAll {
    fn validate(&self, _record: &Record, schema: &Schema) -> Result<(), Vec<FieldError>> {
        Err(vec![FieldError::new(schema.name, "rejected")])
    }
}

#[test]
fn custom_validator_decides() {
    let record = nested_descriptor().to_record(true);
    let err = CodeDescriptor::from_record_with(&record, &RejectAll).expect_err("rejected");
    match err {
        CodeError::Format { fields, .. } => {
            assert_eq!(fields, vec![FieldError::new("CompiledFunctionDescriptor", "rejected")])
        }
        other => panic!("unexpected error {other:?}"),
    }
}

#[test]
fn nested_code_errors_name_their_path() {
    let mut record = nested_descriptor().to_record(true);
    record["constants"][2]["$code"]
        .as_object_mut()
        .expect("nested record")
        .remove("bytecode");
    let err = CodeDescriptor::from_record(&record).expect_err("broken nested code");
    match err {
        CodeError::Format { fields, .. } => {
            assert_eq!(fields[0].field, "constants[2].bytecode");
        }
        other => panic!("unexpected error {other:?}"),
    }
}
