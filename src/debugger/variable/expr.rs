use itertools::Itertools;
use std::fmt::{Display, Formatter};

/// Symbolic path identifying a value in the debuggee: a variable of the
/// current frame followed by field accesses, property accesses and method
/// calls. The path is what survives a resume - values themselves are
/// point-in-time and are re-read by evaluating the expression again.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// No source path (internal values such as a thread's runtime object).
    Empty,
    /// A local variable or argument of the current frame.
    Variable(String),
    /// Field of the base expression's value.
    Field(Box<Expr>, String),
    /// Property of the base expression's value (read through the get accessor).
    Property(Box<Expr>, String),
    /// Method call on the base expression's value.
    Call(Box<Expr>, String, Vec<Expr>),
}

impl Expr {
    /// Return boxed expression.
    pub fn boxed(self) -> Box<Self> {
        Box::new(self)
    }

    pub fn variable(name: impl ToString) -> Self {
        Expr::Variable(name.to_string())
    }

    pub fn field(self, name: impl ToString) -> Self {
        Expr::Field(self.boxed(), name.to_string())
    }

    pub fn property(self, name: impl ToString) -> Self {
        Expr::Property(self.boxed(), name.to_string())
    }

    pub fn call(self, name: impl ToString, args: Vec<Expr>) -> Self {
        Expr::Call(self.boxed(), name.to_string(), args)
    }

    fn prefix(base: &Expr) -> String {
        match base {
            Expr::Empty => String::new(),
            other => format!("{other}."),
        }
    }
}

impl Display for Expr {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Expr::Empty => Ok(()),
            Expr::Variable(name) => f.write_str(name),
            Expr::Field(base, name) | Expr::Property(base, name) => {
                write!(f, "{}{name}", Expr::prefix(base))
            }
            Expr::Call(base, name, args) => {
                let args = args.iter().map(|a| a.to_string()).join(", ");
                write!(f, "{}{name}({args})", Expr::prefix(base))
            }
        }
    }
}
