mod support;

use fp_cil::opcode::OpCode;
use fp_cil::SharedRegistry;
use fp_core::lir::{DynamicOp, LirInstruction, MethodBody, MethodBodyBuilder, NumericOp, TempId};
use fp_core::metadata::TypeRef;
use pretty_assertions::assert_eq;
use support::interp::{Machine, Value};
use support::{assemble, function, opcodes};

const OPERATORS: &str = "Runtime.Operators";

fn temp_for(builder: &mut MethodBodyBuilder, ty: &TypeRef) -> TempId {
    match ty {
        TypeRef::Number => builder.number_temp(),
        TypeRef::Boolean => builder.boolean_temp(),
        _ => builder.object_temp(),
    }
}

/// `(a, b) => <instruction>`, returning the instruction's result.
fn binary(
    params: [TypeRef; 2],
    make: impl FnOnce(TempId, TempId, TempId) -> LirInstruction,
) -> MethodBody {
    let mut builder = MethodBodyBuilder::new();
    let a = temp_for(&mut builder, &params[0]);
    let b = temp_for(&mut builder, &params[1]);
    let result = builder.object_temp();
    builder
        .push(LirInstruction::LoadParameter { index: 0, result: a })
        .push(LirInstruction::LoadParameter { index: 1, result: b })
        .push(make(a, b, result))
        .push(LirInstruction::Return {
            value: Some(result),
        });
    builder.build()
}

/// `(a) => <instruction>`, returning the instruction's result.
fn unary(param: TypeRef, make: impl FnOnce(TempId, TempId) -> LirInstruction) -> MethodBody {
    let mut builder = MethodBodyBuilder::new();
    let operand = temp_for(&mut builder, &param);
    let result = builder.object_temp();
    builder
        .push(LirInstruction::LoadParameter {
            index: 0,
            result: operand,
        })
        .push(make(operand, result))
        .push(LirInstruction::Return {
            value: Some(result),
        });
    builder.build()
}

fn run_binary<'r>(
    registry: &'r SharedRegistry,
    params: [TypeRef; 2],
    body: &MethodBody,
    args: [Value; 2],
    hooks: impl FnOnce(&mut Machine<'_>),
) -> (Option<Value>, Machine<'r>) {
    let descriptor = function("op", &[("a", params[0].clone()), ("b", params[1].clone())]);
    let assembled = assemble(registry, &descriptor, body);
    let mut machine = Machine::new(registry);
    hooks(&mut machine);
    let [a, b] = args;
    let result = machine.run(&assembled, vec![Value::Null, a, b]);
    (result, machine)
}

fn run_unary(
    registry: &SharedRegistry,
    param: TypeRef,
    body: &MethodBody,
    arg: Value,
    hooks: impl FnOnce(&mut Machine<'_>),
) -> Option<Value> {
    let assembled = assemble(registry, &function("op", &[("a", param)]), body);
    let mut machine = Machine::new(registry);
    hooks(&mut machine);
    machine.run(&assembled, vec![Value::Null, arg])
}

fn objects() -> [TypeRef; 2] {
    [TypeRef::Object, TypeRef::Object]
}

#[test]
fn dynamic_binary_operators_go_through_the_runtime() {
    let registry = SharedRegistry::new();
    let add = binary(objects(), |left, right, result| LirInstruction::DynamicBinary {
        op: DynamicOp::Add,
        left,
        right,
        result,
    });
    let (sum, machine) = run_binary(
        &registry,
        objects(),
        &add,
        [Value::F64(2.0), Value::F64(5.0)],
        |machine| {
            machine.hook(OPERATORS, "Add", |_, args| {
                Some(Value::F64(args[0].as_f64() + args[1].as_f64()))
            })
        },
    );
    assert_eq!(sum, Some(Value::F64(7.0)));
    assert_eq!(machine.calls_to("Add")[0].args, vec![Value::F64(2.0), Value::F64(5.0)]);

    // Relational operators hand back an unboxed boolean.
    let less = binary(objects(), |left, right, result| LirInstruction::DynamicBinary {
        op: DynamicOp::LessThan,
        left,
        right,
        result,
    });
    let (flag, _) = run_binary(
        &registry,
        objects(),
        &less,
        [Value::F64(2.0), Value::F64(5.0)],
        |machine| {
            machine.hook(OPERATORS, "LessThan", |_, args| {
                Some(Value::I32(i32::from(args[0].as_f64() < args[1].as_f64())))
            })
        },
    );
    assert_eq!(flag, Some(Value::I32(1)));
}

#[test]
fn number_operands_are_boxed_before_a_runtime_operator() {
    let registry = SharedRegistry::new();
    let params = [TypeRef::Number, TypeRef::Number];
    let body = binary(params.clone(), |left, right, result| {
        LirInstruction::DynamicBinary {
            op: DynamicOp::Exponent,
            left,
            right,
            result,
        }
    });
    let descriptor = function("pow", &[("a", TypeRef::Number), ("b", TypeRef::Number)]);
    let ops = opcodes(&assemble(&registry, &descriptor, &body));
    assert_eq!(ops.iter().filter(|op| **op == OpCode::Box).count(), 2);

    let (value, _) = run_binary(
        &registry,
        params,
        &body,
        [Value::F64(2.0), Value::F64(10.0)],
        |machine| {
            machine.hook(OPERATORS, "Exponent", |_, args| {
                Some(Value::F64(args[0].as_f64().powf(args[1].as_f64())))
            })
        },
    );
    assert_eq!(value, Some(Value::F64(1024.0)));
}

fn equality(strict: bool, negated: bool) -> MethodBody {
    binary(objects(), |left, right, result| {
        if strict {
            LirInstruction::StrictEquals {
                left,
                right,
                negated,
                result,
            }
        } else {
            LirInstruction::LooseEquals {
                left,
                right,
                negated,
                result,
            }
        }
    })
}

fn install_equality_hooks(machine: &mut Machine<'_>) {
    for name in ["LooseEquals", "StrictEquals"] {
        machine.hook(OPERATORS, name, |_, args| {
            Some(Value::I32(i32::from(args[0] == args[1])))
        });
    }
}

#[test]
fn negated_equality_inverts_the_runtime_answer() {
    let registry = SharedRegistry::new();
    for strict in [false, true] {
        for negated in [false, true] {
            let body = equality(strict, negated);
            let ops = opcodes(&assemble(
                &registry,
                &function("eq", &[("a", TypeRef::Object), ("b", TypeRef::Object)]),
                &body,
            ));
            let inverts = ops
                .windows(3)
                .any(|window| window == [OpCode::Call, OpCode::LdcI4, OpCode::Ceq]);
            assert_eq!(inverts, negated, "strict={} negated={}", strict, negated);

            for (left, right, equal) in [
                (Value::F64(1.0), Value::F64(1.0), true),
                (Value::F64(1.0), Value::Str("1".to_string()), false),
            ] {
                let (answer, _) =
                    run_binary(&registry, objects(), &body, [left, right], install_equality_hooks);
                let expected = i32::from(equal != negated);
                assert_eq!(
                    answer,
                    Some(Value::I32(expected)),
                    "strict={} negated={} equal={}",
                    strict,
                    negated,
                    equal
                );
            }
        }
    }
}

#[test]
fn in_and_instanceof_pass_their_operands_in_order() {
    let registry = SharedRegistry::new();
    let contains = binary(objects(), |key, object, result| LirInstruction::In {
        key,
        object,
        result,
    });
    let key = Value::Str("x".to_string());
    let (answer, machine) = run_binary(
        &registry,
        objects(),
        &contains,
        [key.clone(), Value::Null],
        |machine| machine.hook(OPERATORS, "In", |_, _| Some(Value::I32(1))),
    );
    assert_eq!(answer, Some(Value::I32(1)));
    assert_eq!(machine.calls_to("In")[0].args, vec![key, Value::Null]);

    let instance_of = binary(objects(), |value, constructor, result| {
        LirInstruction::InstanceOf {
            value,
            constructor,
            result,
        }
    });
    let (answer, machine) = run_binary(
        &registry,
        objects(),
        &instance_of,
        [Value::F64(3.0), Value::Str("Date".to_string())],
        |machine| machine.hook(OPERATORS, "InstanceOf", |_, _| Some(Value::I32(0))),
    );
    assert_eq!(answer, Some(Value::I32(0)));
    assert_eq!(
        machine.calls_to("InstanceOf")[0].args,
        vec![Value::F64(3.0), Value::Str("Date".to_string())]
    );
}

#[test]
fn unary_minus_and_typeof_are_runtime_calls() {
    let registry = SharedRegistry::new();
    let minus = unary(TypeRef::Object, |operand, result| LirInstruction::UnaryMinus {
        operand,
        result,
    });
    let four = Value::Str("4".to_string());
    let negated = run_unary(&registry, TypeRef::Object, &minus, four, |machine| {
        machine.hook(OPERATORS, "UnaryMinus", |_, args| {
            Some(Value::F64(-args[0].as_f64()))
        })
    });
    assert_eq!(negated, Some(Value::F64(-4.0)));

    let type_of = unary(TypeRef::Number, |operand, result| LirInstruction::TypeOf {
        operand,
        result,
    });
    let name = run_unary(&registry, TypeRef::Number, &type_of, Value::F64(1.0), |machine| {
        machine.hook("Runtime.TypeUtilities", "TypeOf", |_, args| {
            Some(Value::Str(match args[0] {
                Value::F64(_) => "number".to_string(),
                _ => "object".to_string(),
            }))
        })
    });
    assert_eq!(name, Some(Value::Str("number".to_string())));
}

fn numeric(op: NumericOp) -> MethodBody {
    let mut builder = MethodBodyBuilder::new();
    let a = builder.number_temp();
    let b = builder.number_temp();
    let result = builder.number_temp();
    builder
        .push(LirInstruction::LoadParameter { index: 0, result: a })
        .push(LirInstruction::LoadParameter { index: 1, result: b })
        .push(LirInstruction::Binary {
            op,
            left: a,
            right: b,
            result,
        })
        .push(LirInstruction::Return {
            value: Some(result),
        });
    builder.build()
}

fn eval_numeric(op: NumericOp, a: f64, b: f64) -> f64 {
    let registry = SharedRegistry::new();
    let descriptor = function("num", &[("a", TypeRef::Number), ("b", TypeRef::Number)]);
    let body = assemble(&registry, &descriptor, &numeric(op));
    let mut machine = Machine::new(&registry);
    machine
        .run(&body, vec![Value::Null, Value::F64(a), Value::F64(b)])
        .expect("a number")
        .as_f64()
}

#[test]
fn unsigned_shift_produces_a_non_negative_number() {
    let registry = SharedRegistry::new();
    let descriptor = function("num", &[("a", TypeRef::Number), ("b", TypeRef::Number)]);
    let ops = opcodes(&assemble(&registry, &descriptor, &numeric(NumericOp::UShr)));
    let shift = ops.iter().position(|op| *op == OpCode::ShrUn).expect("shr.un");
    assert_eq!(&ops[shift + 1..shift + 3], &[OpCode::ConvRUn, OpCode::ConvR8]);

    assert_eq!(eval_numeric(NumericOp::UShr, -1.0, 0.0), 4294967295.0);
    assert_eq!(eval_numeric(NumericOp::UShr, -16.0, 28.0), 15.0);
    // Shift counts are taken modulo 32.
    assert_eq!(eval_numeric(NumericOp::UShr, 8.0, 33.0), 4.0);
    assert_eq!(eval_numeric(NumericOp::Shr, -16.0, 2.0), -4.0);
}

#[test]
fn bitwise_operators_truncate_to_int32() {
    assert_eq!(eval_numeric(NumericOp::BitAnd, 6.9, 3.0), 2.0);
    assert_eq!(eval_numeric(NumericOp::BitOr, 4.0, 1.5), 5.0);
    assert_eq!(eval_numeric(NumericOp::BitXor, 5.0, 1.0), 4.0);
    assert_eq!(eval_numeric(NumericOp::Shl, 1.0, 4.0), 16.0);
    assert_eq!(eval_numeric(NumericOp::Rem, 7.5, 2.0), 1.5);
}

#[test]
fn negate_not_and_bit_not() {
    let registry = SharedRegistry::new();
    let negate = unary(TypeRef::Number, |operand, result| LirInstruction::Negate {
        operand,
        result,
    });
    assert_eq!(
        run_unary(&registry, TypeRef::Number, &negate, Value::F64(2.5), |_| {}),
        Some(Value::F64(-2.5))
    );

    let bit_not = unary(TypeRef::Number, |operand, result| LirInstruction::BitNot {
        operand,
        result,
    });
    assert_eq!(
        run_unary(&registry, TypeRef::Number, &bit_not, Value::F64(5.0), |_| {}),
        Some(Value::F64(-6.0))
    );

    let not = unary(TypeRef::Boolean, |operand, result| LirInstruction::Not {
        operand,
        result,
    });
    for (flag, expected) in [(1, 0), (0, 1)] {
        assert_eq!(
            run_unary(&registry, TypeRef::Boolean, &not, Value::I32(flag), |_| {}),
            Some(Value::I32(expected))
        );
    }

    // A non-boolean operand is tested for truthiness first.
    let not_object = unary(TypeRef::Object, |operand, result| LirInstruction::Not {
        operand,
        result,
    });
    assert_eq!(
        run_unary(&registry, TypeRef::Object, &not_object, Value::Str(String::new()), |_| {}),
        Some(Value::I32(1))
    );
}

#[test]
fn conversions_to_number_and_string() {
    let registry = SharedRegistry::new();
    let to_number = |param: TypeRef| {
        unary(param, |source, result| LirInstruction::ConvertToNumber { source, result })
    };
    assert_eq!(
        run_unary(
            &registry,
            TypeRef::Object,
            &to_number(TypeRef::Object),
            Value::Str("42".to_string()),
            |_| {}
        ),
        Some(Value::F64(42.0))
    );
    let from_boolean = to_number(TypeRef::Boolean);
    let ops = opcodes(&assemble(
        &registry,
        &function("op", &[("a", TypeRef::Boolean)]),
        &from_boolean,
    ));
    assert!(ops.contains(&OpCode::ConvR8));
    assert_eq!(
        run_unary(&registry, TypeRef::Boolean, &from_boolean, Value::I32(1), |_| {}),
        Some(Value::F64(1.0))
    );

    let to_string = unary(TypeRef::Number, |source, result| {
        LirInstruction::ConvertToString { source, result }
    });
    let ops = opcodes(&assemble(
        &registry,
        &function("op", &[("a", TypeRef::Number)]),
        &to_string,
    ));
    let call = ops.iter().position(|op| *op == OpCode::Call).expect("call");
    assert_eq!(ops[call - 1], OpCode::Box);
    let text = run_unary(&registry, TypeRef::Number, &to_string, Value::F64(3.0), |machine| {
        machine.hook("Runtime.TypeUtilities", "ToString", |_, args| {
            Some(Value::Str(args[0].as_f64().to_string()))
        })
    });
    assert_eq!(text, Some(Value::Str("3".to_string())));
}
