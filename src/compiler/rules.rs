//! Pratt parser rule table.

use super::lexer::TokenKind;

/// Binding power, lowest first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    /// The next-higher level; used for left-associative binary operands.
    pub fn next(self) -> Self {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

/// Parse handlers the parser dispatches on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ParseFn {
    Grouping,
    Call,
    Dot,
    Unary,
    Binary,
    Variable,
    String,
    Number,
    Literal,
    And,
    Or,
    This,
    Super,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParseRule {
    pub prefix: Option<ParseFn>,
    pub infix: Option<ParseFn>,
    pub precedence: Precedence,
}

const fn rule(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> ParseRule {
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

pub fn rule_for(kind: TokenKind) -> ParseRule {
    use ParseFn as F;
    use Precedence as P;

    match kind {
        TokenKind::LeftParen => rule(Some(F::Grouping), Some(F::Call), P::Call),
        TokenKind::Dot => rule(None, Some(F::Dot), P::Call),
        TokenKind::Minus => rule(Some(F::Unary), Some(F::Binary), P::Term),
        TokenKind::Plus => rule(None, Some(F::Binary), P::Term),
        TokenKind::Slash | TokenKind::Star => rule(None, Some(F::Binary), P::Factor),
        TokenKind::Bang => rule(Some(F::Unary), None, P::None),
        TokenKind::BangEqual | TokenKind::EqualEqual => rule(None, Some(F::Binary), P::Equality),
        TokenKind::Greater | TokenKind::GreaterEqual | TokenKind::Less | TokenKind::LessEqual => {
            rule(None, Some(F::Binary), P::Comparison)
        }
        TokenKind::Identifier => rule(Some(F::Variable), None, P::None),
        TokenKind::String => rule(Some(F::String), None, P::None),
        TokenKind::Number => rule(Some(F::Number), None, P::None),
        TokenKind::And => rule(None, Some(F::And), P::And),
        TokenKind::Or => rule(None, Some(F::Or), P::Or),
        TokenKind::False | TokenKind::True | TokenKind::Nil => rule(Some(F::Literal), None, P::None),
        TokenKind::This => rule(Some(F::This), None, P::None),
        TokenKind::Super => rule(Some(F::Super), None, P::None),
        _ => rule(None, None, P::None),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_precedence_order() {
        assert!(Precedence::Assignment < Precedence::Or);
        assert!(Precedence::Factor > Precedence::Term);
        assert_eq!(Precedence::Term.next(), Precedence::Factor);
        assert_eq!(Precedence::Primary.next(), Precedence::Primary);
    }

    #[test]
    fn test_rules() {
        let minus = rule_for(TokenKind::Minus);
        assert_eq!(minus.prefix, Some(ParseFn::Unary));
        assert_eq!(minus.infix, Some(ParseFn::Binary));
        assert_eq!(minus.precedence, Precedence::Term);

        let semicolon = rule_for(TokenKind::Semicolon);
        assert_eq!(semicolon.prefix, None);
        assert_eq!(semicolon.precedence, Precedence::None);
    }
}
