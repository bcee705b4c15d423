// Tests for the lalrpop grammar. There is no hand-written parser code
// in this crate; `grammar.lalrpop` is compiled by `build.rs` into
// `crate::grammar`, which these tests exercise directly.

#[cfg(test)]
mod tests {
    use crate::ast::{BinOpKind::*, Expr::*};
    use crate::grammar;

    fn parses_to(text: &str, expected: crate::ast::Expr) {
        assert_eq!(grammar::ExpParser::new().parse(text).unwrap(), expected);
    }

    #[test]
    fn numbers_and_identifiers() {
        parses_to("42", Number(42));
        parses_to("foo", Var("foo".into()));
    }

    #[test]
    fn parenthesized_expression_unwraps() {
        parses_to("(42)", Number(42));
    }

    #[test]
    fn binary_operators_chain_left_associatively() {
        // `+ - == <` share one precedence tier, so this groups as
        // `((1 + 2) - 3) < 4`, not by conventional arithmetic binding.
        parses_to(
            "1 + 2 - 3 < 4",
            BinOp(
                Lt,
                Box::new(BinOp(
                    Sub,
                    Box::new(BinOp(Add, Box::new(Number(1)), Box::new(Number(2)))),
                    Box::new(Number(3)),
                )),
                Box::new(Number(4)),
            ),
        );
    }

    #[test]
    fn assignment_is_right_associative() {
        parses_to(
            "a = b = 1",
            Assign("a".into(), Box::new(Assign("b".into(), Box::new(Number(1))))),
        );
    }

    #[test]
    fn field_accessor_and_setter() {
        parses_to("p.x", FieldAccessor(Box::new(Var("p".into())), "x".into()));
        parses_to(
            "p.x = 1",
            FieldSetter(Box::new(Var("p".into())), "x".into(), Box::new(Number(1))),
        );
    }

    #[test]
    fn object_literal_and_call() {
        parses_to("object()", Obj);
        parses_to(
            "add(1, 2)",
            Call("add".into(), vec![Number(1), Number(2)]),
        );
    }

    #[test]
    fn a_whole_function_with_control_flow() {
        use crate::ast::Statement::*;

        let src = "fn max(a, b) { if (a < b) { return b } else { return a } }";
        let program = grammar::ProgramParser::new().parse(src).unwrap();
        assert_eq!(program.functions.len(), 1);

        let f = &program.functions[0];
        assert_eq!(f.name, "max");
        assert_eq!(f.params, vec!["a".to_string(), "b".to_string()]);
        assert_eq!(
            f.body,
            vec![IfElse(
                BinOp(Lt, Box::new(Var("a".into())), Box::new(Var("b".into()))),
                vec![Return(Var("b".into()))],
                vec![Return(Var("a".into()))],
            )]
        );
    }

    #[test]
    fn for_loop_with_semicolon_separated_clauses() {
        use crate::ast::Statement::*;

        let src = "fn main() { for (i = 0; i < 10; i = i + 1) { i } }";
        let program = grammar::ProgramParser::new().parse(src).unwrap();
        let f = &program.functions[0];
        assert_eq!(
            f.body,
            vec![For(
                Assign("i".into(), Box::new(Number(0))),
                BinOp(Lt, Box::new(Var("i".into())), Box::new(Number(10))),
                Assign(
                    "i".into(),
                    Box::new(BinOp(Add, Box::new(Var("i".into())), Box::new(Number(1)))),
                ),
                vec![Expr(Var("i".into()))],
            )]
        );
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(grammar::ExpParser::new().parse("1 +").is_err());
    }
}
