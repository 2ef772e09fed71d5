//! A minimal stack-machine evaluator over the in-memory image.
//!
//! Integration tests use it to actually execute rewritten method bodies, so
//! splice semantics (short-circuiting, by-reference parameter mutation,
//! return-value replacement) are verified by running the patched code, not by
//! pattern-matching the emitted instructions.
//!
//! Hook dispatch mirrors the runtime contract: a `callvirt` into the hook
//! container is intercepted when a closure is installed under the hook's
//! identity string; otherwise the slot's own default body executes.

use std::collections::HashMap;

use cilsplice::prelude::*;

const STEP_LIMIT: usize = 100_000;

/// A runtime value of the evaluator.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i32),
    Long(i64),
    Float(f64),
    Str(String),
    /// Managed pointer to a local slot of the calling frame
    Ref(usize),
}

impl Value {
    fn truthy(&self) -> bool {
        match self {
            Value::Null => false,
            Value::Int(v) => *v != 0,
            Value::Long(v) => *v != 0,
            Value::Float(v) => *v != 0.0,
            Value::Str(_) | Value::Ref(_) => true,
        }
    }

    pub fn as_int(&self) -> i32 {
        match self {
            Value::Int(v) => *v,
            other => panic!("expected an int, got {other:?}"),
        }
    }
}

fn default_for(ty: &TypeSig) -> Value {
    match ty {
        TypeSig::Bool | TypeSig::I4 => Value::Int(0),
        TypeSig::I8 => Value::Long(0),
        TypeSig::R8 => Value::Float(0.0),
        _ => Value::Null,
    }
}

/// View of one intercepted hook call, exposing the by-reference holder slots
/// of the calling frame.
pub struct HookArgs<'a> {
    locals: &'a mut Vec<Value>,
    param_slots: Vec<usize>,
    result_slot: Option<usize>,
    pub target: Option<Value>,
    pub state: Option<bool>,
}

impl HookArgs<'_> {
    pub fn param(&self, index: usize) -> &Value {
        &self.locals[self.param_slots[index]]
    }

    pub fn set_param(&mut self, index: usize, value: Value) {
        let slot = self.param_slots[index];
        self.locals[slot] = value;
    }

    pub fn result(&self) -> &Value {
        &self.locals[self.result_slot.expect("hook call has no result holder")]
    }

    pub fn set_result(&mut self, value: Value) {
        let slot = self.result_slot.expect("hook call has no result holder");
        self.locals[slot] = value;
    }
}

/// A hook implementation. The returned bool is the prefix state flag
/// (true = run the original body); postfix and marker hooks ignore it.
pub type HookFn = Box<dyn FnMut(&mut HookArgs<'_>) -> bool>;

/// Interprets method bodies of one image.
pub struct Evaluator<'a> {
    image: &'a ModuleImage,
    container: String,
    hooks: HashMap<String, HookFn>,
    statics: HashMap<u32, Value>,
    steps: usize,
}

impl<'a> Evaluator<'a> {
    pub fn new(image: &'a ModuleImage, container: &str) -> Self {
        Evaluator {
            image,
            container: container.to_string(),
            hooks: HashMap::new(),
            statics: HashMap::new(),
            steps: 0,
        }
    }

    /// Install a hook implementation under its identity string.
    pub fn install(&mut self, name: &str, hook: HookFn) {
        self.hooks.insert(name.to_string(), hook);
    }

    /// Call a method by name. `args` must include the receiver for instance
    /// methods (a `Value::Null` receiver is acceptable; the evaluator does not
    /// dereference it).
    pub fn call(&mut self, type_name: &str, method_name: &str, args: Vec<Value>) -> Value {
        let token = self
            .image
            .find_method(type_name, method_name, None)
            .unwrap_or_else(|| panic!("no method {type_name}::{method_name}"));
        self.exec(token, args)
    }

    /// Intercept a hook-container call if a closure is installed for its
    /// identity string. Returns the pushed result on interception.
    fn dispatch_hook(
        &mut self,
        callee_token: Token,
        args: Vec<Value>,
        locals: &mut Vec<Value>,
    ) -> Option<Option<Value>> {
        let callee = self.image.method(callee_token).unwrap();

        let mut name = None;
        let mut target = None;
        let mut state = None;
        let mut ref_slots = Vec::new();
        // args[0] is the router receiver; declared params follow in order
        for (param, value) in callee.params.iter().zip(args.into_iter().skip(1)) {
            match &param.ty {
                TypeSig::String => {
                    if let Value::Str(text) = value {
                        name = Some(text);
                    }
                }
                TypeSig::Object => target = Some(value),
                TypeSig::Bool => state = Some(value.truthy()),
                TypeSig::ByRef(_) => {
                    if let Value::Ref(slot) = value {
                        ref_slots.push(slot);
                    }
                }
                other => panic!("unexpected hook parameter type {other}"),
            }
        }

        let name = name?;
        if !self.hooks.contains_key(&name) {
            return None;
        }

        // for prefix/postfix shapes the last by-ref slot is the result holder
        let result_slot = ref_slots.pop();
        let mut hook_args = HookArgs {
            locals,
            param_slots: ref_slots,
            result_slot,
            target,
            state,
        };
        let mut hook = self.hooks.remove(&name).unwrap();
        let flag = hook(&mut hook_args);
        self.hooks.insert(name, hook);

        if callee.return_type == TypeSig::Bool {
            Some(Some(Value::Int(i32::from(flag))))
        } else {
            Some(None)
        }
    }

    fn exec(&mut self, token: Token, mut args: Vec<Value>) -> Value {
        let image = self.image;
        let method = image.method(token).unwrap();
        let body = method
            .body
            .as_ref()
            .unwrap_or_else(|| panic!("method {} has no body", method.name));
        let is_void = method.return_type.is_void();

        let index_of: HashMap<InstrId, usize> = body
            .instructions()
            .iter()
            .enumerate()
            .map(|(index, instr)| (instr.id, index))
            .collect();

        let mut locals: Vec<Value> = body.locals.iter().map(|l| default_for(&l.ty)).collect();
        let mut stack: Vec<Value> = Vec::new();
        let mut pc = 0usize;

        macro_rules! pop {
            () => {
                stack.pop().expect("operand stack underflow")
            };
        }
        macro_rules! branch_to {
            ($target:expr) => {{
                pc = index_of[&$target];
                continue;
            }};
        }

        loop {
            self.steps += 1;
            assert!(self.steps < STEP_LIMIT, "step limit exceeded (runaway loop?)");
            let instr = &body.instructions()[pc];

            match (instr.opcode, instr.operand) {
                (OpCode::Nop, _) => {}
                (OpCode::LdArg0, _) => stack.push(args[0].clone()),
                (OpCode::LdArg1, _) => stack.push(args[1].clone()),
                (OpCode::LdArg2, _) => stack.push(args[2].clone()),
                (OpCode::LdArg3, _) => stack.push(args[3].clone()),
                (OpCode::LdArgS, Operand::Argument(index)) => {
                    stack.push(args[index as usize].clone());
                }
                (OpCode::StArgS, Operand::Argument(index)) => args[index as usize] = pop!(),
                (OpCode::LdLoc0, _) => stack.push(locals[0].clone()),
                (OpCode::LdLoc1, _) => stack.push(locals[1].clone()),
                (OpCode::LdLoc2, _) => stack.push(locals[2].clone()),
                (OpCode::LdLoc3, _) => stack.push(locals[3].clone()),
                (OpCode::LdLocS, Operand::Local(slot)) => stack.push(locals[slot as usize].clone()),
                (OpCode::StLoc0, _) => locals[0] = pop!(),
                (OpCode::StLoc1, _) => locals[1] = pop!(),
                (OpCode::StLoc2, _) => locals[2] = pop!(),
                (OpCode::StLoc3, _) => locals[3] = pop!(),
                (OpCode::StLocS, Operand::Local(slot)) => locals[slot as usize] = pop!(),
                (OpCode::LdLocaS, Operand::Local(slot)) => stack.push(Value::Ref(slot as usize)),
                (OpCode::LdNull, _) => stack.push(Value::Null),
                (OpCode::LdcI4M1, _) => stack.push(Value::Int(-1)),
                (OpCode::LdcI40, _) => stack.push(Value::Int(0)),
                (OpCode::LdcI41, _) => stack.push(Value::Int(1)),
                (OpCode::LdcI42, _) => stack.push(Value::Int(2)),
                (OpCode::LdcI43, _) => stack.push(Value::Int(3)),
                (OpCode::LdcI44, _) => stack.push(Value::Int(4)),
                (OpCode::LdcI45, _) => stack.push(Value::Int(5)),
                (OpCode::LdcI46, _) => stack.push(Value::Int(6)),
                (OpCode::LdcI47, _) => stack.push(Value::Int(7)),
                (OpCode::LdcI48, _) => stack.push(Value::Int(8)),
                (OpCode::LdcI4S | OpCode::LdcI4, Operand::Int32(v)) => stack.push(Value::Int(v)),
                (OpCode::LdcI8, Operand::Int64(v)) => stack.push(Value::Long(v)),
                (OpCode::LdcR8, Operand::Float64(v)) => stack.push(Value::Float(v)),
                (OpCode::Dup, _) => {
                    let top = stack.last().expect("operand stack underflow").clone();
                    stack.push(top);
                }
                (OpCode::Pop, _) => {
                    pop!();
                }
                (OpCode::LdStr, Operand::Token(token)) => {
                    stack.push(Value::Str(image.user_string(token).unwrap().to_string()));
                }
                (OpCode::Box | OpCode::UnboxAny | OpCode::CastClass, _) => {}
                (OpCode::LdSFld, Operand::Token(token)) => {
                    let value = self.statics.get(&token.raw()).cloned().unwrap_or_else(|| {
                        default_for(&image.field(token).unwrap().ty)
                    });
                    stack.push(value);
                }
                (OpCode::StSFld, Operand::Token(token)) => {
                    let value = pop!();
                    self.statics.insert(token.raw(), value);
                }
                (OpCode::Add, _) => binary_arith(&mut stack, |a, b| a + b, |a, b| a + b, |a, b| a + b),
                (OpCode::Sub, _) => binary_arith(&mut stack, |a, b| a - b, |a, b| a - b, |a, b| a - b),
                (OpCode::Mul, _) => binary_arith(&mut stack, |a, b| a * b, |a, b| a * b, |a, b| a * b),
                (OpCode::Div, _) => binary_arith(&mut stack, |a, b| a / b, |a, b| a / b, |a, b| a / b),
                (OpCode::Ceq, _) => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(Value::Int(i32::from(a == b)));
                }
                (OpCode::Cgt, _) => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(Value::Int(i32::from(a.as_int() > b.as_int())));
                }
                (OpCode::Clt, _) => {
                    let b = pop!();
                    let a = pop!();
                    stack.push(Value::Int(i32::from(a.as_int() < b.as_int())));
                }
                (OpCode::Br | OpCode::BrS, Operand::Target(target)) => branch_to!(target),
                (OpCode::BrTrue | OpCode::BrTrueS, Operand::Target(target)) => {
                    if pop!().truthy() {
                        branch_to!(target);
                    }
                }
                (OpCode::BrFalse | OpCode::BrFalseS, Operand::Target(target)) => {
                    if !pop!().truthy() {
                        branch_to!(target);
                    }
                }
                (
                    OpCode::Beq
                    | OpCode::BeqS
                    | OpCode::Bge
                    | OpCode::BgeS
                    | OpCode::Bgt
                    | OpCode::BgtS
                    | OpCode::Ble
                    | OpCode::BleS
                    | OpCode::Blt
                    | OpCode::BltS
                    | OpCode::BneUn
                    | OpCode::BneUnS,
                    Operand::Target(target),
                ) => {
                    let b = pop!().as_int();
                    let a = pop!().as_int();
                    let taken = match instr.opcode {
                        OpCode::Beq | OpCode::BeqS => a == b,
                        OpCode::Bge | OpCode::BgeS => a >= b,
                        OpCode::Bgt | OpCode::BgtS => a > b,
                        OpCode::Ble | OpCode::BleS => a <= b,
                        OpCode::Blt | OpCode::BltS => a < b,
                        _ => a != b,
                    };
                    if taken {
                        branch_to!(target);
                    }
                }
                (OpCode::Call | OpCode::CallVirt, Operand::Token(callee_token)) => {
                    let callee = image.method(callee_token).unwrap();
                    let total = callee.params.len() + usize::from(!callee.is_static());
                    let call_args = stack.split_off(stack.len() - total);
                    let returns_value = !callee.return_type.is_void();
                    let declaring = image.type_def(callee.declaring).unwrap();

                    if declaring.full_name == self.container {
                        if let Some(result) =
                            self.dispatch_hook(callee_token, call_args.clone(), &mut locals)
                        {
                            if let Some(value) = result {
                                stack.push(value);
                            }
                            pc += 1;
                            continue;
                        }
                    }
                    let ret = self.exec(callee_token, call_args);
                    if returns_value {
                        stack.push(ret);
                    }
                }
                (OpCode::Ret, _) => {
                    return if is_void { Value::Null } else { pop!() };
                }
                (opcode, operand) => {
                    panic!("evaluator does not support {opcode:?} with {operand:?}")
                }
            }
            pc += 1;
        }
    }
}

fn binary_arith(
    stack: &mut Vec<Value>,
    int_op: fn(i32, i32) -> i32,
    long_op: fn(i64, i64) -> i64,
    float_op: fn(f64, f64) -> f64,
) {
    let b = stack.pop().expect("operand stack underflow");
    let a = stack.pop().expect("operand stack underflow");
    let result = match (a, b) {
        (Value::Int(a), Value::Int(b)) => Value::Int(int_op(a, b)),
        (Value::Long(a), Value::Long(b)) => Value::Long(long_op(a, b)),
        (Value::Float(a), Value::Float(b)) => Value::Float(float_op(a, b)),
        (a, b) => panic!("mismatched arithmetic operands: {a:?} and {b:?}"),
    };
    stack.push(result);
}
