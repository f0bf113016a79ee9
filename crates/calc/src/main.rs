//! `calc`: compute integer operations from the command line.

use clap::{Parser, Subcommand};

/// Compute operations.
#[derive(Parser, Debug)]
#[command(name = "calc", version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    op: Op,
}

#[derive(Subcommand, Debug)]
enum Op {
    /// Addition.
    Sum(Operands),
    /// Subtraction.
    Sub(Operands),
    /// Multiplication.
    Mul(Operands),
    /// Division.
    Div(Operands),
    /// Exponentiation.
    Pow(Operands),
}

#[derive(clap::Args, Debug)]
struct Operands {
    #[arg(allow_negative_numbers = true)]
    first: i64,
    #[arg(allow_negative_numbers = true)]
    second: i64,
}

fn run(op: Op) -> Result<i64, calc::CalcError> {
    Ok(match op {
        Op::Sum(o) => calc::sum(o.first, o.second),
        Op::Sub(o) => calc::sub(o.first, o.second),
        Op::Mul(o) => calc::mul(o.first, o.second),
        Op::Div(o) => calc::div(o.first, o.second)?,
        Op::Pow(o) => calc::pow(o.first, o.second),
    })
}

#[allow(clippy::print_stdout)]
fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    print!("{}", run(cli.op)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    #![allow(clippy::expect_used)]

    use super::*;

    fn eval(args: &[&str]) -> Result<i64, calc::CalcError> {
        let cli = Cli::try_parse_from(std::iter::once("calc").chain(args.iter().copied()))
            .expect("parse");
        run(cli.op)
    }

    #[test]
    fn run_dispatches_each_operation() {
        assert_eq!(eval(&["sum", "2", "5"]), Ok(7));
        assert_eq!(eval(&["sub", "2", "5"]), Ok(-3));
        assert_eq!(eval(&["mul", "2", "5"]), Ok(10));
        assert_eq!(eval(&["div", "10", "5"]), Ok(2));
        assert_eq!(eval(&["pow", "2", "5"]), Ok(32));
    }

    #[test]
    fn run_accepts_negative_operands() {
        assert_eq!(eval(&["sum", "-2", "-5"]), Ok(-7));
    }

    #[test]
    fn run_reports_division_by_zero() {
        assert_eq!(eval(&["div", "1", "0"]), Err(calc::CalcError::DivisionByZero));
    }

    #[test]
    fn cli_rejects_non_numeric_operands() {
        assert!(Cli::try_parse_from(["calc", "sum", "one", "2"]).is_err());
        assert!(Cli::try_parse_from(["calc", "sum", "1"]).is_err());
    }
}
