// intvm: fixed-width integer stack evaluator
// ------------------------------------------------------------
// Executes flat sequences of 32-bit and 64-bit integer instructions
// against a single operand stack.
//

use anyhow::Context;
use blake3::Hasher;
use num_bigint::BigInt;
use num_traits::{One, Signed, ToPrimitive, Zero};
use std::fmt::{self, Debug, Display};
use std::marker::PhantomData;
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, trace, warn};


// ------------------------- Utilities -------------------------

fn hex(b: &[u8]) -> String {
    b.iter().map(|x| format!("{:02x}", x)).collect()
}

// ------------------------- Values ---------------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StackValue {
    Num(BigInt),
    Trap,
}

impl StackValue {
    pub fn is_trap(&self) -> bool {
        matches!(self, StackValue::Trap)
    }

    pub fn as_num(&self) -> Option<&BigInt> {
        match self {
            StackValue::Num(n) => Some(n),
            StackValue::Trap => None,
        }
    }

    pub fn into_num(self) -> Option<BigInt> {
        match self {
            StackValue::Num(n) => Some(n),
            StackValue::Trap => None,
        }
    }
}

impl From<BigInt> for StackValue {
    fn from(n: BigInt) -> Self {
        StackValue::Num(n)
    }
}

impl From<i64> for StackValue {
    fn from(n: i64) -> Self {
        StackValue::Num(n.into())
    }
}

impl From<u64> for StackValue {
    fn from(n: u64) -> Self {
        StackValue::Num(n.into())
    }
}

impl From<i32> for StackValue {
    fn from(n: i32) -> Self {
        StackValue::Num(n.into())
    }
}

impl Display for StackValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StackValue::Num(n) => write!(f, "{n}"),
            StackValue::Trap => write!(f, "trap"),
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct Stack {
    items: Vec<StackValue>,
}

impl Stack {
    pub fn new() -> Self {
        Self { items: Vec::new() }
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn push(&mut self, value: StackValue) {
        self.items.push(value);
    }

    pub fn push_num(&mut self, n: BigInt) {
        self.items.push(StackValue::Num(n));
    }

    fn push_bool(&mut self, b: bool) {
        self.push_num(if b { BigInt::one() } else { BigInt::zero() });
    }

    fn push_trap(&mut self) {
        self.items.push(StackValue::Trap);
    }

    pub fn pop(&mut self) -> Option<StackValue> {
        self.items.pop()
    }

    pub fn top(&self) -> Option<&StackValue> {
        self.items.last()
    }

    pub fn as_slice(&self) -> &[StackValue] {
        &self.items
    }

    pub fn into_vec(self) -> Vec<StackValue> {
        self.items
    }

    // Pops top first. Nothing is removed unless all K operands are numeric.
    fn pop_operands<const K: usize>(&mut self, op: Op) -> Result<[BigInt; K], ContractViolation> {
        let depth = self.items.len();
        if depth < K {
            return Err(ContractViolation::StackUnderflow {
                op: op.name(),
                needed: K,
                depth,
            });
        }
        if self.items[depth - K..].iter().any(StackValue::is_trap) {
            return Err(ContractViolation::TrapOperand { op: op.name() });
        }
        let mut popped = self
            .items
            .split_off(depth - K)
            .into_iter()
            .rev()
            .filter_map(StackValue::into_num);
        Ok(std::array::from_fn(|_| popped.next().unwrap_or_default()))
    }
}

impl From<Vec<StackValue>> for Stack {
    fn from(items: Vec<StackValue>) -> Self {
        Self { items }
    }
}

// -------------------- Contract violations --------------------

#[derive(Clone, Debug, PartialEq, Eq, Error)]
pub enum ContractViolation {
    #[error("stack underflow: {op} needs {needed} operand(s), stack holds {depth}")]
    StackUnderflow {
        op: &'static str,
        needed: usize,
        depth: usize,
    },

    #[error("{op} received a trap as an operand")]
    TrapOperand { op: &'static str },

    #[error("value {value} is out of range for {bits}-bit signed interpretation")]
    SignedRange { value: BigInt, bits: u32 },

    #[error("shift amount {amount} is out of range")]
    ShiftRange { amount: BigInt },

    #[error("const requires an immediate operand")]
    MissingImmediate,

    #[error("{op} does not take an immediate operand")]
    UnexpectedImmediate { op: &'static str },

    #[error("unknown operation: {name}")]
    UnknownOperation { name: String },

    #[error("width mismatch: expected {expected} operation, found {found}")]
    WidthMismatch {
        expected: &'static str,
        found: String,
    },
}

// -------------------------- Widths ---------------------------

pub trait Width: Copy + Debug + Default + Eq + 'static {
    const BITS: u32;
    const NAME: &'static str;
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct I32;

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct I64;

impl Width for I32 {
    const BITS: u32 = 32;
    const NAME: &'static str = "i32";
}

impl Width for I64 {
    const BITS: u32 = 64;
    const NAME: &'static str = "i64";
}

const WIDTH_NAMES: [&str; 2] = [I32::NAME, I64::NAME];

// ------------------------ Operations -------------------------

#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash)]
pub enum Op {
    Const = 0x00,
    Add = 0x10,
    Sub = 0x11,
    Mul = 0x12,
    DivU = 0x13,
    DivS = 0x14,
    RemU = 0x15,
    RemS = 0x16,
    And = 0x20,
    Or = 0x21,
    Xor = 0x22,
    Shl = 0x23,
    ShrU = 0x24,
    ShrS = 0x25,
    Rotl = 0x26,
    Rotr = 0x27,
    Clz = 0x30,
    Ctz = 0x31,
    Popcnt = 0x32,
    Eqz = 0x40,
    Eq = 0x41,
    Ne = 0x42,
    LtU = 0x43,
    LtS = 0x44,
    GtU = 0x45,
    GtS = 0x46,
    LeU = 0x47,
    LeS = 0x48,
    GeU = 0x49,
    GeS = 0x4A,
}

impl Op {
    pub const ALL: [Op; 30] = [
        Op::Const,
        Op::Add,
        Op::Sub,
        Op::Mul,
        Op::DivU,
        Op::DivS,
        Op::RemU,
        Op::RemS,
        Op::And,
        Op::Or,
        Op::Xor,
        Op::Shl,
        Op::ShrU,
        Op::ShrS,
        Op::Rotl,
        Op::Rotr,
        Op::Clz,
        Op::Ctz,
        Op::Popcnt,
        Op::Eqz,
        Op::Eq,
        Op::Ne,
        Op::LtU,
        Op::LtS,
        Op::GtU,
        Op::GtS,
        Op::LeU,
        Op::LeS,
        Op::GeU,
        Op::GeS,
    ];

    pub fn name(self) -> &'static str {
        match self {
            Op::Const => "const",
            Op::Add => "add",
            Op::Sub => "sub",
            Op::Mul => "mul",
            Op::DivU => "div_u",
            Op::DivS => "div_s",
            Op::RemU => "rem_u",
            Op::RemS => "rem_s",
            Op::And => "and",
            Op::Or => "or",
            Op::Xor => "xor",
            Op::Shl => "shl",
            Op::ShrU => "shr_u",
            Op::ShrS => "shr_s",
            Op::Rotl => "rotl",
            Op::Rotr => "rotr",
            Op::Clz => "clz",
            Op::Ctz => "ctz",
            Op::Popcnt => "popcnt",
            Op::Eqz => "eqz",
            Op::Eq => "eq",
            Op::Ne => "ne",
            Op::LtU => "lt_u",
            Op::LtS => "lt_s",
            Op::GtU => "gt_u",
            Op::GtS => "gt_s",
            Op::LeU => "le_u",
            Op::LeS => "le_s",
            Op::GeU => "ge_u",
            Op::GeS => "ge_s",
        }
    }

    pub fn arity(self) -> usize {
        match self {
            Op::Const => 0,
            Op::Clz | Op::Ctz | Op::Popcnt | Op::Eqz => 1,
            _ => 2,
        }
    }

    pub fn can_trap(self) -> bool {
        matches!(self, Op::DivU | Op::DivS | Op::RemU | Op::RemS)
    }
}

impl Display for Op {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Op {
    type Err = ContractViolation;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Op::ALL
            .into_iter()
            .find(|op| op.name() == s)
            .ok_or_else(|| ContractViolation::UnknownOperation { name: s.to_string() })
    }
}

#[derive(Copy, Clone)]
enum Shift {
    Left,
    Right,
}

// Arbitrary-precision shift: a negative amount shifts the other way.
// Right shifts saturate to 0 or -1 once the amount no longer fits; left
// shifts allocate 2^k bits, so amounts past u32::MAX are refused.
fn shift(value: &BigInt, amount: &BigInt, dir: Shift) -> Result<BigInt, ContractViolation> {
    let left = matches!(dir, Shift::Left) != amount.is_negative();
    let k = amount.abs().to_usize().filter(|k| *k <= u32::MAX as usize);
    match (left, k) {
        (true, Some(k)) => Ok(value.clone() << k),
        (true, None) => Err(ContractViolation::ShiftRange {
            amount: amount.clone(),
        }),
        (false, Some(k)) => Ok(value.clone() >> k),
        (false, None) if value.is_negative() => Ok(-BigInt::one()),
        (false, None) => Ok(BigInt::zero()),
    }
}

// ------------------- Integer Operation Set -------------------

/// Operation table for one bit-width.
///
/// The most recently pushed value is popped first. Arithmetic and bitwise
/// ops treat it as the left operand (`sub` is `top - second`); shifts,
/// rotations and ordered comparisons treat it as the right one (`shl`
/// shifts `second` by `top`, `lt_u` is `second < top`).
#[derive(Clone, Debug)]
pub struct IntOps<W: Width> {
    modulus: BigInt,
    signed_max: BigInt,
    signed_min: BigInt,
    mask: BigInt,
    _width: PhantomData<W>,
}

pub type I32Ops = IntOps<I32>;
pub type I64Ops = IntOps<I64>;

impl<W: Width> Default for IntOps<W> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Width> IntOps<W> {
    pub fn new() -> Self {
        let modulus = BigInt::one() << W::BITS as usize;
        let half = BigInt::one() << (W::BITS - 1) as usize;
        Self {
            mask: &modulus - BigInt::one(),
            signed_max: &half - BigInt::one(),
            signed_min: -half,
            modulus,
            _width: PhantomData,
        }
    }

    pub fn bits(&self) -> u32 {
        W::BITS
    }

    pub fn modulus(&self) -> &BigInt {
        &self.modulus
    }

    pub fn signed_max(&self) -> &BigInt {
        &self.signed_max
    }

    pub fn signed_min(&self) -> &BigInt {
        &self.signed_min
    }

    pub fn operations(&self) -> &'static [Op] {
        &Op::ALL
    }

    pub fn qualified_name(&self, op: Op) -> String {
        format!("{}.{}", W::NAME, op.name())
    }

    pub fn lookup(&self, qualified: &str) -> Result<Op, ContractViolation> {
        let unknown = || ContractViolation::UnknownOperation {
            name: qualified.to_string(),
        };
        let (prefix, bare) = qualified.split_once('.').ok_or_else(unknown)?;
        if prefix != W::NAME {
            return Err(if WIDTH_NAMES.contains(&prefix) {
                ContractViolation::WidthMismatch {
                    expected: W::NAME,
                    found: qualified.to_string(),
                }
            } else {
                unknown()
            });
        }
        bare.parse::<Op>().map_err(|_| unknown())
    }

    pub fn run(&self, instruction: &Instruction, stack: &mut Stack) -> Result<(), ContractViolation> {
        match instruction {
            Instruction::WithImmediate(Op::Const, x) => {
                self.constant(stack, x);
                Ok(())
            }
            Instruction::WithImmediate(op, _) => {
                Err(ContractViolation::UnexpectedImmediate { op: op.name() })
            }
            Instruction::Bare(op) => self.apply(*op, stack),
        }
    }

    pub fn apply(&self, op: Op, stack: &mut Stack) -> Result<(), ContractViolation> {
        match op {
            Op::Const => Err(ContractViolation::MissingImmediate),
            Op::Add => self.add(stack),
            Op::Sub => self.sub(stack),
            Op::Mul => self.mul(stack),
            Op::DivU => self.div_u(stack),
            Op::DivS => self.div_s(stack),
            Op::RemU => self.rem_u(stack),
            Op::RemS => self.rem_s(stack),
            Op::And => self.and(stack),
            Op::Or => self.or(stack),
            Op::Xor => self.xor(stack),
            Op::Shl => self.shl(stack),
            Op::ShrU => self.shr_u(stack),
            Op::ShrS => self.shr_s(stack),
            Op::Rotl => self.rotl(stack),
            Op::Rotr => self.rotr(stack),
            Op::Clz => self.clz(stack),
            Op::Ctz => self.ctz(stack),
            Op::Popcnt => self.popcnt(stack),
            Op::Eqz => self.eqz(stack),
            Op::Eq => self.eq(stack),
            Op::Ne => self.ne(stack),
            Op::LtU => self.lt_u(stack),
            Op::LtS => self.lt_s(stack),
            Op::GtU => self.gt_u(stack),
            Op::GtS => self.gt_s(stack),
            Op::LeU => self.le_u(stack),
            Op::LeS => self.le_s(stack),
            Op::GeU => self.ge_u(stack),
            Op::GeS => self.ge_s(stack),
        }
    }

    fn unsigned(&self, i: &BigInt) -> BigInt {
        let r = i % &self.modulus;
        if r.is_negative() {
            r + &self.modulus
        } else {
            r
        }
    }

    // Residues at or above SIGNED_MAX map by subtracting SIGNED_MAX, not the
    // modulus. div_s and rem_s depend on this exact mapping.
    fn signed(&self, i: &BigInt) -> Result<BigInt, ContractViolation> {
        if !i.is_negative() && i < &self.signed_max {
            Ok(i.clone())
        } else if i >= &self.signed_max && i < &self.modulus {
            Ok(i - &self.signed_max)
        } else {
            Err(ContractViolation::SignedRange {
                value: i.clone(),
                bits: W::BITS,
            })
        }
    }

    pub fn constant(&self, stack: &mut Stack, x: &BigInt) {
        stack.push_num(x.clone());
    }

    pub fn add(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Add)?;
        stack.push_num((top + second) % &self.modulus);
        Ok(())
    }

    pub fn sub(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Sub)?;
        stack.push_num((top - second + &self.modulus) % &self.modulus);
        Ok(())
    }

    pub fn mul(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Mul)?;
        stack.push_num((top * second) % &self.modulus);
        Ok(())
    }

    pub fn div_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::DivU)?;
        let (dividend, divisor) = (self.unsigned(&top), self.unsigned(&second));
        if divisor.is_zero() {
            stack.push_trap();
        } else {
            stack.push_num(dividend / divisor);
        }
        Ok(())
    }

    pub fn div_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::DivS)?;
        let dividend = self.signed(&top)?;
        let divisor = self.signed(&second)?;
        if divisor.is_zero() {
            stack.push_trap();
            return Ok(());
        }
        let quotient = dividend / divisor;
        if quotient == self.signed_max {
            stack.push_trap();
        } else {
            stack.push_num(quotient);
        }
        Ok(())
    }

    pub fn rem_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::RemU)?;
        let (dividend, divisor) = (self.unsigned(&top), self.unsigned(&second));
        if divisor.is_zero() {
            stack.push_trap();
        } else {
            let quotient = &dividend / &divisor;
            stack.push_num(dividend - divisor * quotient);
        }
        Ok(())
    }

    pub fn rem_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::RemS)?;
        let dividend = self.signed(&top)?;
        let divisor = self.signed(&second)?;
        if divisor.is_zero() {
            stack.push_trap();
        } else {
            let quotient = &dividend / &divisor;
            stack.push_num(dividend - divisor * quotient);
        }
        Ok(())
    }

    pub fn and(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::And)?;
        stack.push_num(top & second);
        Ok(())
    }

    pub fn or(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Or)?;
        stack.push_num(top | second);
        Ok(())
    }

    pub fn xor(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Xor)?;
        stack.push_num(top ^ second);
        Ok(())
    }

    // Unmasked: an i32 amount near 2^32 builds a result of that many bits.
    pub fn shl(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [amount, value] = stack.pop_operands::<2>(Op::Shl)?;
        if amount > BigInt::from(1u32 << 16) {
            debug!(%amount, "large left shift");
        }
        stack.push_num(shift(&value, &amount, Shift::Left)?);
        Ok(())
    }

    pub fn shr_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [amount, value] = stack.pop_operands::<2>(Op::ShrU)?;
        stack.push_num(shift(&self.unsigned(&value), &amount, Shift::Right)?);
        Ok(())
    }

    pub fn shr_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [amount, value] = stack.pop_operands::<2>(Op::ShrS)?;
        stack.push_num(shift(&value, &amount, Shift::Right)?);
        Ok(())
    }

    pub fn rotl(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [amount, value] = stack.pop_operands::<2>(Op::Rotl)?;
        let value = value % &self.modulus;
        let back = BigInt::from(W::BITS) - &amount;
        let high = shift(&value, &amount, Shift::Left)? & &self.mask;
        let low = shift(&value, &back, Shift::Right)?;
        stack.push_num(high | low);
        Ok(())
    }

    pub fn rotr(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [amount, value] = stack.pop_operands::<2>(Op::Rotr)?;
        let value = value % &self.modulus;
        let back = BigInt::from(W::BITS) - &amount;
        let low = shift(&value, &amount, Shift::Right)?;
        let high = shift(&value, &back, Shift::Left)? & &self.mask;
        stack.push_num(low | high);
        Ok(())
    }

    pub fn clz(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [value] = stack.pop_operands::<1>(Op::Clz)?;
        let low = self.unsigned(&value).iter_u32_digits().next().unwrap_or(0);
        stack.push_num(BigInt::from(low.leading_zeros()));
        Ok(())
    }

    // N when no bit is set
    pub fn ctz(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [value] = stack.pop_operands::<1>(Op::Ctz)?;
        let count = self
            .unsigned(&value)
            .trailing_zeros()
            .unwrap_or(u64::from(W::BITS));
        stack.push_num(BigInt::from(count));
        Ok(())
    }

    pub fn popcnt(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [value] = stack.pop_operands::<1>(Op::Popcnt)?;
        let count: u64 = self
            .unsigned(&value)
            .iter_u64_digits()
            .map(|d| u64::from(d.count_ones()))
            .sum();
        stack.push_num(BigInt::from(count));
        Ok(())
    }

    pub fn eqz(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [value] = stack.pop_operands::<1>(Op::Eqz)?;
        stack.push_bool(value.is_zero());
        Ok(())
    }

    pub fn eq(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Eq)?;
        stack.push_bool(top == second);
        Ok(())
    }

    pub fn ne(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::Ne)?;
        stack.push_bool(top != second);
        Ok(())
    }

    pub fn lt_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::LtU)?;
        stack.push_bool(self.unsigned(&second) < self.unsigned(&top));
        Ok(())
    }

    // Signed comparisons use native ordering of the raw values.
    pub fn lt_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::LtS)?;
        stack.push_bool(second < top);
        Ok(())
    }

    pub fn gt_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::GtU)?;
        stack.push_bool(self.unsigned(&second) > self.unsigned(&top));
        Ok(())
    }

    pub fn gt_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::GtS)?;
        stack.push_bool(second > top);
        Ok(())
    }

    pub fn le_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::LeU)?;
        stack.push_bool(self.unsigned(&second) <= self.unsigned(&top));
        Ok(())
    }

    pub fn le_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::LeS)?;
        stack.push_bool(second <= top);
        Ok(())
    }

    pub fn ge_u(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::GeU)?;
        stack.push_bool(self.unsigned(&second) >= self.unsigned(&top));
        Ok(())
    }

    pub fn ge_s(&self, stack: &mut Stack) -> Result<(), ContractViolation> {
        let [top, second] = stack.pop_operands::<2>(Op::GeS)?;
        stack.push_bool(second >= top);
        Ok(())
    }
}

// ------------------ Instructions & Programs ------------------

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum Instruction {
    Bare(Op),
    WithImmediate(Op, BigInt),
}

impl Instruction {
    pub fn op(op: Op) -> Self {
        Instruction::Bare(op)
    }

    pub fn constant(x: impl Into<BigInt>) -> Self {
        Instruction::WithImmediate(Op::Const, x.into())
    }

    pub fn operation(&self) -> Op {
        match self {
            Instruction::Bare(op) | Instruction::WithImmediate(op, _) => *op,
        }
    }

    pub fn immediate(&self) -> Option<&BigInt> {
        match self {
            Instruction::Bare(_) => None,
            Instruction::WithImmediate(_, x) => Some(x),
        }
    }
}

impl From<Op> for Instruction {
    fn from(op: Op) -> Self {
        Instruction::Bare(op)
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Program<W: Width> {
    instructions: Vec<Instruction>,
    _width: PhantomData<W>,
}

impl<W: Width> Program<W> {
    pub fn new(instructions: Vec<Instruction>) -> Self {
        Self {
            instructions,
            _width: PhantomData,
        }
    }

    pub fn len(&self) -> usize {
        self.instructions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.instructions.is_empty()
    }

    pub fn instructions(&self) -> &[Instruction] {
        &self.instructions
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Instruction> {
        self.instructions.iter()
    }

    pub fn digest(&self) -> [u8; 32] {
        let mut h = Hasher::new();
        h.update(&W::BITS.to_be_bytes());
        for instruction in &self.instructions {
            h.update(&[instruction.operation() as u8]);
            match instruction.immediate() {
                None => {
                    h.update(&[0x00]);
                }
                Some(x) => {
                    let bytes = x.to_signed_bytes_be();
                    h.update(&[0x01]);
                    h.update(&(bytes.len() as u32).to_be_bytes());
                    h.update(&bytes);
                }
            }
        }
        *h.finalize().as_bytes()
    }
}

impl<W: Width> FromIterator<Instruction> for Program<W> {
    fn from_iter<T: IntoIterator<Item = Instruction>>(iter: T) -> Self {
        Self::new(iter.into_iter().collect())
    }
}

impl<'a, W: Width> IntoIterator for &'a Program<W> {
    type Item = &'a Instruction;
    type IntoIter = std::slice::Iter<'a, Instruction>;

    fn into_iter(self) -> Self::IntoIter {
        self.instructions.iter()
    }
}

// ------------------------- Executor --------------------------

// The stack is never reset between execute calls.
#[derive(Clone, Debug, Default)]
pub struct Executor<W: Width> {
    ops: IntOps<W>,
    stack: Stack,
}

impl<W: Width> Executor<W> {
    pub fn new() -> Self {
        Self {
            ops: IntOps::new(),
            stack: Stack::new(),
        }
    }

    pub fn with_stack(stack: Stack) -> Self {
        Self {
            ops: IntOps::new(),
            stack,
        }
    }

    pub fn ops(&self) -> &IntOps<W> {
        &self.ops
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn top(&self) -> Option<&StackValue> {
        self.stack.top()
    }

    pub fn depth(&self) -> usize {
        self.stack.len()
    }

    pub fn into_stack(self) -> Stack {
        self.stack
    }

    pub fn execute(&mut self, program: &Program<W>) -> anyhow::Result<()> {
        debug!(
            width = W::NAME,
            instructions = program.len(),
            digest = %hex(&program.digest()),
            "executing program"
        );
        for (idx, instruction) in program.iter().enumerate() {
            let op = instruction.operation();
            trace!(idx, op = %op, depth = self.stack.len(), "step");
            self.ops
                .run(instruction, &mut self.stack)
                .inspect_err(|violation| {
                    warn!(idx, op = %op, %violation, "contract violation, aborting program")
                })
                .with_context(|| format!("instruction {idx} ({})", self.ops.qualified_name(op)))?;
            if op.can_trap() && self.stack.top().is_some_and(StackValue::is_trap) {
                debug!(idx, op = %op, "arithmetic trap");
            }
        }
        debug!(width = W::NAME, depth = self.stack.len(), "program finished");
        Ok(())
    }
}
