//! Reference evaluator for assembled IL.
//!
//! Runs an [`AssembledBody`] against a toy heap. Tokens are resolved back to
//! their descriptions through the [`SharedRegistry`] that issued them; the
//! runtime library is stubbed by a handful of built-ins plus per-test hooks.
#![allow(dead_code)]

use fp_cil::artifact::ClauseKind;
use fp_cil::opcode::{CallSite, OpCode, Operand};
use fp_cil::registry::{MetadataEntry, SharedRegistry};
use fp_cil::AssembledBody;
use fp_core::metadata::{FieldRef, MethodRef, Token, TypeRef};
use std::collections::HashMap;

#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    I32(i32),
    F64(f64),
    Str(String),
    Ref(usize),
}

impl Value {
    pub fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::I32(value) => *value != 0,
            Value::F64(value) => *value != 0.0 && !value.is_nan(),
            Value::Str(text) => !text.is_empty(),
            Value::Ref(_) => true,
        }
    }

    pub fn as_f64(&self) -> f64 {
        match self {
            Value::I32(value) => *value as f64,
            Value::F64(value) => *value,
            Value::Null => f64::NAN,
            Value::Str(text) => text.parse().unwrap_or(f64::NAN),
            Value::Ref(_) => f64::NAN,
        }
    }

    pub fn as_i32(&self) -> i32 {
        match self {
            Value::I32(value) => *value,
            Value::F64(value) => *value as i32,
            other => panic!("expected int32, found {:?}", other),
        }
    }

    pub fn id(&self) -> usize {
        match self {
            Value::Ref(id) => *id,
            other => panic!("expected object reference, found {:?}", other),
        }
    }
}

#[derive(Debug, Clone, Default)]
pub struct HeapObject {
    pub ty: String,
    pub fields: HashMap<String, Value>,
    pub items: Vec<Value>,
}

#[derive(Debug, Clone)]
pub struct CallRecord {
    pub method: MethodRef,
    pub args: Vec<Value>,
}

type Hook = Box<dyn FnMut(&mut Vec<HeapObject>, &[Value]) -> Option<Value>>;

pub struct Machine<'r> {
    registry: &'r SharedRegistry,
    pub heap: Vec<HeapObject>,
    pub calls: Vec<CallRecord>,
    hooks: HashMap<(String, String), Hook>,
}

impl<'r> Machine<'r> {
    pub fn new(registry: &'r SharedRegistry) -> Self {
        Self {
            registry,
            heap: Vec::new(),
            calls: Vec::new(),
            hooks: HashMap::new(),
        }
    }

    /// Replaces the behaviour of `owner::name`.
    pub fn hook(
        &mut self,
        owner: &str,
        name: &str,
        hook: impl FnMut(&mut Vec<HeapObject>, &[Value]) -> Option<Value> + 'static,
    ) {
        self.hooks
            .insert((owner.to_string(), name.to_string()), Box::new(hook));
    }

    pub fn alloc(&mut self, ty: &str) -> Value {
        self.heap.push(HeapObject {
            ty: ty.to_string(),
            ..HeapObject::default()
        });
        Value::Ref(self.heap.len() - 1)
    }

    pub fn object(&self, value: &Value) -> &HeapObject {
        &self.heap[value.id()]
    }

    pub fn calls_to(&self, name: &str) -> Vec<&CallRecord> {
        self.calls
            .iter()
            .filter(|call| call.method.name == name)
            .collect()
    }

    fn resolve(&self, token: Token) -> MetadataEntry {
        self.registry
            .resolve(token)
            .unwrap_or_else(|| panic!("token {} was not issued by the registry", token))
    }

    fn method(&self, token: Token) -> MethodRef {
        match self.resolve(token) {
            MetadataEntry::Method(method) => method,
            other => panic!("expected method token, found {:?}", other),
        }
    }

    fn field(&self, token: Token) -> FieldRef {
        match self.resolve(token) {
            MetadataEntry::Field(field) => field,
            other => panic!("expected field token, found {:?}", other),
        }
    }

    fn type_name(&self, token: Token) -> String {
        match self.resolve(token) {
            MetadataEntry::Type(ty) => ty.full_name().to_string(),
            other => panic!("expected type token, found {:?}", other),
        }
    }

    /// Runs `body` to its `ret`, returning the value left for the caller.
    pub fn run(&mut self, body: &AssembledBody, mut args: Vec<Value>) -> Option<Value> {
        let mut locals: Vec<Value> = body.locals.iter().map(default_value).collect();
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;
        // Where each pending `endfinally` continues, innermost last.
        let mut continuations: Vec<usize> = Vec::new();
        let mut steps = 0usize;
        let target = |label: &fp_cil::opcode::Label| body.label_positions[label.0 as usize];

        loop {
            steps += 1;
            assert!(steps < 100_000, "evaluation did not terminate");
            let instruction = &body.instructions[pc];
            pc += 1;
            match (instruction.op, &instruction.operand) {
                (OpCode::Nop, _) => {}
                (OpCode::Ldarg, Operand::Arg(arg)) => stack.push(args[*arg as usize].clone()),
                (OpCode::Starg, Operand::Arg(arg)) => args[*arg as usize] = pop(&mut stack),
                (OpCode::Ldloc, Operand::Local(slot)) => {
                    stack.push(locals[*slot as usize].clone())
                }
                (OpCode::Stloc, Operand::Local(slot)) => locals[*slot as usize] = pop(&mut stack),
                (OpCode::LdcI4, Operand::Int(value)) => stack.push(Value::I32(*value)),
                (OpCode::LdcR8, Operand::Float(value)) => stack.push(Value::F64(*value)),
                (OpCode::Ldnull, _) => stack.push(Value::Null),
                (OpCode::Ldstr, Operand::Token(token)) => match self.resolve(*token) {
                    MetadataEntry::String(text) => stack.push(Value::Str(text)),
                    other => panic!("ldstr of {:?}", other),
                },
                (OpCode::Dup, _) => {
                    let top = stack.last().cloned().expect("dup on empty stack");
                    stack.push(top);
                }
                (OpCode::Pop, _) => {
                    pop(&mut stack);
                }
                (OpCode::Br, Operand::Label(label)) => pc = target(label),
                (OpCode::Leave, Operand::Label(label)) => {
                    stack.clear();
                    let destination = target(label);
                    continuations.push(destination);
                    let handlers = finally_handlers(body, pc - 1, destination);
                    continuations.extend(handlers.into_iter().rev());
                    pc = continuations.pop().expect("leave destination");
                }
                (OpCode::Brtrue, Operand::Label(label)) => {
                    if pop(&mut stack).truthy() {
                        pc = target(label);
                    }
                }
                (OpCode::Brfalse, Operand::Label(label)) => {
                    if !pop(&mut stack).truthy() {
                        pc = target(label);
                    }
                }
                (OpCode::Switch, Operand::Switch(labels)) => {
                    let index = pop(&mut stack).as_i32();
                    if index >= 0 && (index as usize) < labels.len() {
                        pc = target(&labels[index as usize]);
                    }
                }
                (OpCode::Ret, _) => return stack.pop(),
                (OpCode::Throw, _) => panic!("uncaught throw of {:?}", stack.pop()),
                (OpCode::Endfinally, _) => {
                    pc = continuations
                        .pop()
                        .expect("endfinally outside exception dispatch")
                }
                (
                    OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn,
                    _,
                ) => {
                    let right = pop(&mut stack);
                    let left = pop(&mut stack);
                    let result = compare(instruction.op, &left, &right);
                    stack.push(Value::I32(i32::from(result)));
                }
                (OpCode::Add | OpCode::Sub | OpCode::Mul | OpCode::Div | OpCode::Rem, _) => {
                    let right = pop(&mut stack).as_f64();
                    let left = pop(&mut stack).as_f64();
                    let value = match instruction.op {
                        OpCode::Add => left + right,
                        OpCode::Sub => left - right,
                        OpCode::Mul => left * right,
                        OpCode::Div => left / right,
                        _ => left % right,
                    };
                    stack.push(Value::F64(value));
                }
                (
                    OpCode::And
                    | OpCode::Or
                    | OpCode::Xor
                    | OpCode::Shl
                    | OpCode::Shr
                    | OpCode::ShrUn,
                    _,
                ) => {
                    let right = pop(&mut stack).as_i32();
                    let left = pop(&mut stack).as_i32();
                    let value = match instruction.op {
                        OpCode::And => left & right,
                        OpCode::Or => left | right,
                        OpCode::Xor => left ^ right,
                        OpCode::Shl => left.wrapping_shl(right as u32),
                        OpCode::Shr => left.wrapping_shr(right as u32),
                        _ => ((left as u32).wrapping_shr(right as u32)) as i32,
                    };
                    stack.push(Value::I32(value));
                }
                (OpCode::Neg, _) => {
                    let value = pop(&mut stack).as_f64();
                    stack.push(Value::F64(-value));
                }
                (OpCode::Not, _) => {
                    let value = pop(&mut stack).as_i32();
                    stack.push(Value::I32(!value));
                }
                (OpCode::ConvR8, _) => {
                    let value = pop(&mut stack).as_f64();
                    stack.push(Value::F64(value));
                }
                (OpCode::ConvRUn, _) => {
                    let value = pop(&mut stack).as_i32();
                    stack.push(Value::F64(value as u32 as f64));
                }
                (OpCode::ConvI4, _) => {
                    let value = pop(&mut stack).as_f64();
                    stack.push(Value::I32(value as i32));
                }
                (OpCode::Box | OpCode::UnboxAny | OpCode::Castclass, _) => {}
                (OpCode::Isinst, Operand::Token(token)) => {
                    let ty = self.type_name(*token);
                    let value = pop(&mut stack);
                    let matches = match &value {
                        Value::Ref(id) => self.heap[*id].ty == ty,
                        _ => false,
                    };
                    stack.push(if matches { value } else { Value::Null });
                }
                (OpCode::Newarr, Operand::Token(_)) => {
                    let length = pop(&mut stack).as_i32() as usize;
                    let array = self.alloc(TypeRef::ObjectArray.full_name());
                    self.heap[array.id()].items = vec![Value::Null; length];
                    stack.push(array);
                }
                (OpCode::Ldlen, _) => {
                    let array = pop(&mut stack);
                    let length = self.object(&array).items.len();
                    stack.push(Value::I32(length as i32));
                }
                (OpCode::LdelemRef, _) => {
                    let index = pop(&mut stack).as_i32() as usize;
                    let array = pop(&mut stack);
                    stack.push(self.object(&array).items[index].clone());
                }
                (OpCode::StelemRef, _) => {
                    let value = pop(&mut stack);
                    let index = pop(&mut stack).as_i32() as usize;
                    let array = pop(&mut stack);
                    self.heap[array.id()].items[index] = value;
                }
                (OpCode::Ldfld, Operand::Token(token)) => {
                    let field = self.field(*token);
                    let instance = pop(&mut stack);
                    let value = self
                        .object(&instance)
                        .fields
                        .get(&field.name)
                        .cloned()
                        .unwrap_or_else(|| default_value(&field.ty));
                    stack.push(value);
                }
                (OpCode::Stfld, Operand::Token(token)) => {
                    let field = self.field(*token);
                    let value = pop(&mut stack);
                    let instance = pop(&mut stack);
                    self.heap[instance.id()]
                        .fields
                        .insert(field.name.clone(), value);
                }
                (OpCode::Call | OpCode::Callvirt | OpCode::Newobj, Operand::Call(site)) => {
                    self.invoke(instruction.op, site, &mut stack);
                }
                (op, operand) => panic!("evaluator cannot run {:?} {:?}", op, operand),
            }
        }
    }

    fn invoke(&mut self, op: OpCode, site: &CallSite, stack: &mut Vec<Value>) {
        let method = self.method(site.token);
        let split = stack.len() - site.pops as usize;
        let mut args = stack.split_off(split);
        if op == OpCode::Newobj {
            let instance = self.alloc(method.owner.full_name());
            args.insert(0, instance.clone());
            self.calls.push(CallRecord {
                method: method.clone(),
                args: args.clone(),
            });
            let key = (method.owner.full_name().to_string(), method.name.clone());
            if let Some(hook) = self.hooks.get_mut(&key) {
                hook(&mut self.heap, &args);
            }
            stack.push(instance);
            return;
        }

        self.calls.push(CallRecord {
            method: method.clone(),
            args: args.clone(),
        });
        let key = (method.owner.full_name().to_string(), method.name.clone());
        let result = match self.hooks.get_mut(&key) {
            Some(hook) => hook(&mut self.heap, &args),
            None => self.builtin(&method, &args),
        };
        if site.pushes > 0 {
            stack.push(result.unwrap_or(Value::Null));
        }
    }

    fn builtin(&mut self, method: &MethodRef, args: &[Value]) -> Option<Value> {
        match (method.owner.full_name(), method.name.as_str()) {
            ("Runtime.TypeUtilities", "ToNumber") => Some(Value::F64(args[0].as_f64())),
            ("Runtime.TypeUtilities", "ToInt32") => Some(Value::I32(args[0].as_f64() as i32)),
            ("Runtime.TypeUtilities", "IsTruthy") => Some(Value::I32(i32::from(args[0].truthy()))),
            ("Runtime.TypeUtilities", "IsObjectLike") => {
                Some(Value::I32(i32::from(matches!(args[0], Value::Ref(_)))))
            }
            ("Runtime.TypeUtilities", "ToString") => Some(Value::Str(match &args[0] {
                Value::Str(text) => text.clone(),
                other => format!("{:?}", other),
            })),
            ("Runtime.Array", "Add") => {
                self.heap[args[0].id()].items.push(args[1].clone());
                None
            }
            ("Runtime.JsObject", "SetProperty") => {
                let Value::Str(name) = &args[1] else {
                    panic!("property name {:?}", args[1]);
                };
                self.heap[args[0].id()]
                    .fields
                    .insert(name.clone(), args[2].clone());
                None
            }
            ("Runtime.Operators", "GetProperty") => {
                let Value::Str(name) = &args[1] else {
                    panic!("property name {:?}", args[1]);
                };
                Some(
                    self.object(&args[0])
                        .fields
                        .get(name)
                        .cloned()
                        .unwrap_or(Value::Null),
                )
            }
            ("Runtime.Promise", "Resolve") => {
                let promise = self.alloc("Runtime.Promise");
                self.heap[promise.id()]
                    .fields
                    .insert("value".to_string(), args[0].clone());
                Some(promise)
            }
            ("Runtime.IteratorResult", "Create") => {
                let result = self.alloc("Runtime.IteratorResult");
                let entry = &mut self.heap[result.id()];
                entry.fields.insert("value".to_string(), args[0].clone());
                entry.fields.insert("done".to_string(), args[1].clone());
                Some(result)
            }
            _ => None,
        }
    }
}

/// Finally handlers a `leave` at `from` runs before reaching `to`, innermost first.
fn finally_handlers(body: &AssembledBody, from: usize, to: usize) -> Vec<usize> {
    let (from, to) = (body.offsets[from], body.offsets[to]);
    let covers = |start: u32, length: u32, offset: u32| start <= offset && offset < start + length;
    body.clauses
        .iter()
        .filter(|clause| clause.kind == ClauseKind::Finally)
        .filter(|clause| {
            covers(clause.try_offset, clause.try_length, from)
                && !covers(clause.try_offset, clause.try_length, to)
        })
        .map(|clause| {
            body.offsets
                .iter()
                .position(|offset| *offset == clause.handler_offset)
                .expect("handler starts at an instruction")
        })
        .collect()
}

fn pop(stack: &mut Vec<Value>) -> Value {
    stack.pop().expect("stack underflow")
}

pub fn default_value(ty: &TypeRef) -> Value {
    match ty {
        TypeRef::Number => Value::F64(0.0),
        TypeRef::Boolean | TypeRef::Int32 => Value::I32(0),
        _ => Value::Null,
    }
}

fn compare(op: OpCode, left: &Value, right: &Value) -> bool {
    match (left, right) {
        (Value::I32(left), Value::I32(right)) => match op {
            OpCode::Ceq => left == right,
            OpCode::Cgt => left > right,
            OpCode::Clt => left < right,
            OpCode::CgtUn => (*left as u32) > (*right as u32),
            _ => (*left as u32) < (*right as u32),
        },
        (Value::F64(_) | Value::I32(_), Value::F64(_) | Value::I32(_)) => {
            let (left, right) = (left.as_f64(), right.as_f64());
            match op {
                OpCode::Ceq => left == right,
                OpCode::Cgt => left > right,
                OpCode::Clt => left < right,
                // Unordered forms are true when either side is NaN.
                OpCode::CgtUn => !(left <= right),
                _ => !(left >= right),
            }
        }
        (Value::Null, Value::Null) => op == OpCode::Ceq,
        (Value::Ref(left), Value::Ref(right)) => op == OpCode::Ceq && left == right,
        (Value::Str(left), Value::Str(right)) => op == OpCode::Ceq && left == right,
        (Value::Ref(_), Value::Null) | (Value::Null, Value::Ref(_)) => op == OpCode::CgtUn,
        _ => false,
    }
}
