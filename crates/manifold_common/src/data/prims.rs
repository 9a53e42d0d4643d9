#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum Prim {
    // Arithmetic
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Negative,
    Abs,
    Maximum,
    Minimum,

    // Floating point
    Sqrt,
    Exp,
    Log,

    // Comparison
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,

    // Logical
    LogicalAnd,
    LogicalOr,
    LogicalNot,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum PrimCategory {
    Arith,
    Float,
    Compare,
    Logical,
}

impl Prim {
    pub fn arity(self) -> usize {
        match self {
            Prim::Negative | Prim::Abs | Prim::Sqrt | Prim::Exp | Prim::Log | Prim::LogicalNot => 1,
            _ => 2,
        }
    }

    pub fn category(self) -> PrimCategory {
        match self {
            Prim::Add
            | Prim::Subtract
            | Prim::Multiply
            | Prim::Modulo
            | Prim::Negative
            | Prim::Abs
            | Prim::Maximum
            | Prim::Minimum => PrimCategory::Arith,
            Prim::Divide | Prim::Sqrt | Prim::Exp | Prim::Log => PrimCategory::Float,
            Prim::Equal
            | Prim::NotEqual
            | Prim::Less
            | Prim::LessEqual
            | Prim::Greater
            | Prim::GreaterEqual => PrimCategory::Compare,
            Prim::LogicalAnd | Prim::LogicalOr | Prim::LogicalNot => PrimCategory::Logical,
        }
    }
}
