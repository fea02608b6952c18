use fp_core::metadata::Token;
use serde::{Deserialize, Serialize};
use strum_macros::IntoStaticStr;

/// Symbolic branch target inside one body; resolved to an offset on assembly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct Label(pub u32);

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, IntoStaticStr)]
pub enum OpCode {
    #[strum(serialize = "nop")]
    Nop,
    #[strum(serialize = "ldarg")]
    Ldarg,
    #[strum(serialize = "starg")]
    Starg,
    #[strum(serialize = "ldloc")]
    Ldloc,
    #[strum(serialize = "stloc")]
    Stloc,
    #[strum(serialize = "ldc.i4")]
    LdcI4,
    #[strum(serialize = "ldc.r8")]
    LdcR8,
    #[strum(serialize = "ldnull")]
    Ldnull,
    #[strum(serialize = "ldstr")]
    Ldstr,
    #[strum(serialize = "dup")]
    Dup,
    #[strum(serialize = "pop")]
    Pop,
    #[strum(serialize = "call")]
    Call,
    #[strum(serialize = "callvirt")]
    Callvirt,
    #[strum(serialize = "newobj")]
    Newobj,
    #[strum(serialize = "ret")]
    Ret,
    #[strum(serialize = "br")]
    Br,
    #[strum(serialize = "brtrue")]
    Brtrue,
    #[strum(serialize = "brfalse")]
    Brfalse,
    #[strum(serialize = "switch")]
    Switch,
    #[strum(serialize = "leave")]
    Leave,
    #[strum(serialize = "endfinally")]
    Endfinally,
    #[strum(serialize = "throw")]
    Throw,
    #[strum(serialize = "ceq")]
    Ceq,
    #[strum(serialize = "cgt")]
    Cgt,
    #[strum(serialize = "cgt.un")]
    CgtUn,
    #[strum(serialize = "clt")]
    Clt,
    #[strum(serialize = "clt.un")]
    CltUn,
    #[strum(serialize = "add")]
    Add,
    #[strum(serialize = "sub")]
    Sub,
    #[strum(serialize = "mul")]
    Mul,
    #[strum(serialize = "div")]
    Div,
    #[strum(serialize = "rem")]
    Rem,
    #[strum(serialize = "and")]
    And,
    #[strum(serialize = "or")]
    Or,
    #[strum(serialize = "xor")]
    Xor,
    #[strum(serialize = "shl")]
    Shl,
    #[strum(serialize = "shr")]
    Shr,
    #[strum(serialize = "shr.un")]
    ShrUn,
    #[strum(serialize = "neg")]
    Neg,
    #[strum(serialize = "not")]
    Not,
    #[strum(serialize = "conv.r8")]
    ConvR8,
    #[strum(serialize = "conv.r.un")]
    ConvRUn,
    #[strum(serialize = "conv.i4")]
    ConvI4,
    #[strum(serialize = "box")]
    Box,
    #[strum(serialize = "unbox.any")]
    UnboxAny,
    #[strum(serialize = "castclass")]
    Castclass,
    #[strum(serialize = "isinst")]
    Isinst,
    #[strum(serialize = "ldfld")]
    Ldfld,
    #[strum(serialize = "stfld")]
    Stfld,
    #[strum(serialize = "newarr")]
    Newarr,
    #[strum(serialize = "ldlen")]
    Ldlen,
    #[strum(serialize = "ldelem.ref")]
    LdelemRef,
    #[strum(serialize = "stelem.ref")]
    StelemRef,
}

impl OpCode {
    pub fn mnemonic(self) -> &'static str {
        self.into()
    }

    pub fn is_branch(self) -> bool {
        matches!(
            self,
            OpCode::Br | OpCode::Brtrue | OpCode::Brfalse | OpCode::Leave
        )
    }

    /// Control never reaches the next instruction.
    pub fn ends_flow(self) -> bool {
        matches!(
            self,
            OpCode::Br | OpCode::Leave | OpCode::Ret | OpCode::Throw | OpCode::Endfinally
        )
    }
}

/// Operand of a call-like instruction: the member plus its stack shape.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallSite {
    pub token: Token,
    pub pops: u16,
    pub pushes: u16,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Operand {
    None,
    Int(i32),
    Float(f64),
    Local(u16),
    Arg(u16),
    Token(Token),
    Call(CallSite),
    Label(Label),
    Switch(Vec<Label>),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Instruction {
    pub op: OpCode,
    pub operand: Operand,
}

impl Instruction {
    pub fn new(op: OpCode, operand: Operand) -> Self {
        Self { op, operand }
    }

    pub fn simple(op: OpCode) -> Self {
        Self::new(op, Operand::None)
    }

    pub fn mnemonic(&self) -> &'static str {
        self.op.mnemonic()
    }

    /// Encoded size in bytes. Branches always use the long form.
    pub fn encoded_len(&self) -> usize {
        match (&self.op, &self.operand) {
            (OpCode::LdcI4, Operand::Int(value)) => match *value {
                -1..=8 => 1,
                -128..=127 => 2,
                _ => 5,
            },
            (OpCode::LdcR8, _) => 9,
            (OpCode::Ldarg | OpCode::Ldloc | OpCode::Stloc, Operand::Local(index))
            | (OpCode::Ldarg | OpCode::Ldloc | OpCode::Stloc, Operand::Arg(index)) => {
                match *index {
                    0..=3 => 1,
                    4..=255 => 2,
                    _ => 4,
                }
            }
            (OpCode::Starg, Operand::Arg(index)) => {
                if *index <= 255 {
                    2
                } else {
                    4
                }
            }
            (OpCode::Switch, Operand::Switch(targets)) => 5 + 4 * targets.len(),
            (OpCode::Br | OpCode::Brtrue | OpCode::Brfalse | OpCode::Leave, _) => 5,
            (_, Operand::Token(_) | Operand::Call(_)) => 5,
            (
                OpCode::Ceq | OpCode::Cgt | OpCode::CgtUn | OpCode::Clt | OpCode::CltUn,
                _,
            ) => 2,
            _ => 1,
        }
    }

    /// `(pops, pushes)`; `leave` additionally empties the stack.
    pub fn stack_effect(&self, returns_value: bool) -> (u16, u16) {
        match self.op {
            OpCode::Nop | OpCode::Br | OpCode::Leave | OpCode::Endfinally => (0, 0),
            OpCode::Ldarg
            | OpCode::Ldloc
            | OpCode::LdcI4
            | OpCode::LdcR8
            | OpCode::Ldnull
            | OpCode::Ldstr => (0, 1),
            OpCode::Starg
            | OpCode::Stloc
            | OpCode::Pop
            | OpCode::Brtrue
            | OpCode::Brfalse
            | OpCode::Switch
            | OpCode::Throw => (1, 0),
            OpCode::Dup => (1, 2),
            OpCode::Call | OpCode::Callvirt | OpCode::Newobj => match &self.operand {
                Operand::Call(site) => (site.pops, site.pushes),
                _ => (0, 0),
            },
            OpCode::Ret => (u16::from(returns_value), 0),
            OpCode::Ceq
            | OpCode::Cgt
            | OpCode::CgtUn
            | OpCode::Clt
            | OpCode::CltUn
            | OpCode::Add
            | OpCode::Sub
            | OpCode::Mul
            | OpCode::Div
            | OpCode::Rem
            | OpCode::And
            | OpCode::Or
            | OpCode::Xor
            | OpCode::Shl
            | OpCode::Shr
            | OpCode::ShrUn
            | OpCode::LdelemRef => (2, 1),
            OpCode::Neg
            | OpCode::Not
            | OpCode::ConvR8
            | OpCode::ConvRUn
            | OpCode::ConvI4
            | OpCode::Box
            | OpCode::UnboxAny
            | OpCode::Castclass
            | OpCode::Isinst
            | OpCode::Ldfld
            | OpCode::Newarr
            | OpCode::Ldlen => (1, 1),
            OpCode::Stfld => (2, 0),
            OpCode::StelemRef => (3, 0),
        }
    }

    pub fn targets(&self) -> Vec<Label> {
        match &self.operand {
            Operand::Label(label) => vec![*label],
            Operand::Switch(labels) => labels.clone(),
            _ => Vec::new(),
        }
    }
}
