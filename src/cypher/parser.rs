//! Cypher recursive descent parser.
//!
//! Parses token streams into the AST of [`super::ast`]. Supports:
//! - MATCH / OPTIONAL MATCH with patterns, variable-length relationships,
//!   named paths
//! - WHERE, WITH, RETURN, ORDER BY, SKIP, LIMIT, DISTINCT, UNION [ALL]
//! - CREATE, MERGE (ON CREATE / ON MATCH), DELETE / DETACH DELETE,
//!   SET, REMOVE, UNWIND, FOREACH
//! - CREATE/DROP INDEX and CONSTRAINT schema commands
//! - Full expression parsing with precedence

use crate::{Error, Result};
use super::ast::*;
use super::lexer::{Token, TokenKind};

/// Parser state — a token slice with a cursor.
struct Parser<'t> {
    tokens: &'t [Token],
    pos: usize,
}

impl<'t> Parser<'t> {
    fn new(tokens: &'t [Token]) -> Self {
        Self { tokens, pos: 0 }
    }

    fn peek(&self) -> &Token {
        &self.tokens[self.pos.min(self.tokens.len() - 1)]
    }

    fn peek_kind(&self) -> TokenKind {
        self.peek().kind
    }

    fn peek_kind_at(&self, offset: usize) -> TokenKind {
        self.tokens[(self.pos + offset).min(self.tokens.len() - 1)].kind
    }

    fn advance(&mut self) -> &Token {
        let tok = &self.tokens[self.pos.min(self.tokens.len() - 1)];
        if self.pos < self.tokens.len() {
            self.pos += 1;
        }
        tok
    }

    fn expect(&mut self, kind: TokenKind) -> Result<&Token> {
        let tok = self.peek();
        if tok.kind == kind {
            Ok(self.advance())
        } else {
            Err(self.error(format!("expected {:?}, got {:?} '{}'", kind, tok.kind, tok.text)))
        }
    }

    fn at(&self, kind: TokenKind) -> bool {
        self.peek_kind() == kind
    }

    fn eat(&mut self, kind: TokenKind) -> bool {
        if self.at(kind) {
            self.advance();
            true
        } else {
            false
        }
    }

    fn error(&self, msg: String) -> Error {
        Error::Syntax {
            position: self.peek().span.start,
            message: msg,
        }
    }

    /// An identifier-like token (keywords double as identifiers where the
    /// grammar allows: labels and properties named "order", "on", …).
    fn ident(&mut self) -> Result<String> {
        let tok = self.peek();
        match tok.kind {
            TokenKind::Identifier
            | TokenKind::All
            | TokenKind::Unique
            | TokenKind::Mandatory
            | TokenKind::Fulltext
            | TokenKind::By => {
                let text = tok.text.clone();
                self.advance();
                Ok(text)
            }
            kind => Err(self.error(format!("expected identifier, got {kind:?}"))),
        }
    }
}

/// Parse a complete statement (query or schema command).
pub fn parse_ast(tokens: &[Token]) -> Result<Ast> {
    let mut p = Parser::new(tokens);

    let ast = if is_schema_command(&p) {
        Ast::Schema(parse_schema_command(&mut p)?)
    } else {
        Ast::Query(parse_statement(&mut p)?)
    };

    p.eat(TokenKind::Semicolon);
    if !p.at(TokenKind::Eof) {
        return Err(p.error(format!("unexpected token after statement: {:?}", p.peek_kind())));
    }
    Ok(ast)
}

fn is_schema_command(p: &Parser) -> bool {
    match p.peek_kind() {
        TokenKind::Drop => true,
        TokenKind::Create => matches!(
            p.peek_kind_at(1),
            TokenKind::Index | TokenKind::Constraint | TokenKind::Fulltext
        ),
        _ => false,
    }
}

// ============================================================================
// Statements
// ============================================================================

fn parse_statement(p: &mut Parser) -> Result<Statement> {
    let mut segments = vec![parse_single_query(p)?];
    let mut union_all = Vec::new();

    while p.eat(TokenKind::Union) {
        union_all.push(p.eat(TokenKind::All));
        segments.push(parse_single_query(p)?);
    }

    Ok(Statement { segments, union_all })
}

fn parse_single_query(p: &mut Parser) -> Result<SingleQuery> {
    let mut clauses = Vec::new();

    loop {
        match p.peek_kind() {
            TokenKind::Match => {
                p.advance();
                clauses.push(parse_match(p, false)?);
            }
            TokenKind::Optional => {
                p.advance();
                p.expect(TokenKind::Match)?;
                clauses.push(parse_match(p, true)?);
            }
            TokenKind::Unwind => {
                p.advance();
                let expr = parse_expr(p)?;
                p.expect(TokenKind::As)?;
                let alias = p.ident()?;
                clauses.push(Clause::Unwind { expr, alias });
            }
            TokenKind::Create => {
                p.advance();
                clauses.push(Clause::Create { patterns: parse_pattern_list(p)? });
            }
            TokenKind::Merge => {
                p.advance();
                clauses.push(parse_merge(p)?);
            }
            TokenKind::Set => {
                p.advance();
                clauses.push(Clause::Set(parse_set_items(p)?));
            }
            TokenKind::Remove => {
                p.advance();
                clauses.push(Clause::Remove(parse_remove_items(p)?));
            }
            TokenKind::Delete => {
                p.advance();
                clauses.push(parse_delete(p, false)?);
            }
            TokenKind::Detach => {
                p.advance();
                p.expect(TokenKind::Delete)?;
                clauses.push(parse_delete(p, true)?);
            }
            TokenKind::Foreach => {
                p.advance();
                clauses.push(parse_foreach(p)?);
            }
            TokenKind::With => {
                p.advance();
                clauses.push(Clause::With(parse_projection(p, true)?));
            }
            TokenKind::Return => {
                p.advance();
                clauses.push(Clause::Return(parse_projection(p, false)?));
                break;
            }
            TokenKind::Eof | TokenKind::Semicolon | TokenKind::Union => break,
            kind => {
                return Err(p.error(format!("unexpected token {kind:?} at start of clause")));
            }
        }
    }

    if clauses.is_empty() {
        return Err(p.error("empty query".into()));
    }
    Ok(SingleQuery { clauses })
}

fn parse_match(p: &mut Parser, optional: bool) -> Result<Clause> {
    let patterns = parse_pattern_list(p)?;
    let where_clause = if p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };
    Ok(Clause::Match { optional, patterns, where_clause })
}

fn parse_merge(p: &mut Parser) -> Result<Clause> {
    let pattern = parse_pattern(p)?;
    let mut on_create = Vec::new();
    let mut on_match = Vec::new();
    while p.at(TokenKind::On) {
        p.advance();
        if p.eat(TokenKind::Create) {
            p.expect(TokenKind::Set)?;
            on_create.extend(parse_set_items(p)?);
        } else if p.eat(TokenKind::Match) {
            p.expect(TokenKind::Set)?;
            on_match.extend(parse_set_items(p)?);
        } else {
            return Err(p.error("expected CREATE or MATCH after ON".into()));
        }
    }
    Ok(Clause::Merge { pattern, on_create, on_match })
}

fn parse_delete(p: &mut Parser, detach: bool) -> Result<Clause> {
    let mut exprs = vec![parse_expr(p)?];
    while p.eat(TokenKind::Comma) {
        exprs.push(parse_expr(p)?);
    }
    Ok(Clause::Delete { exprs, detach })
}

fn parse_foreach(p: &mut Parser) -> Result<Clause> {
    p.expect(TokenKind::LParen)?;
    let variable = p.ident()?;
    p.expect(TokenKind::In)?;
    let list = parse_expr(p)?;
    p.expect(TokenKind::Pipe)?;

    let mut body = Vec::new();
    while !p.at(TokenKind::RParen) {
        match p.peek_kind() {
            TokenKind::Set => {
                p.advance();
                body.push(Clause::Set(parse_set_items(p)?));
            }
            TokenKind::Create => {
                p.advance();
                body.push(Clause::Create { patterns: parse_pattern_list(p)? });
            }
            TokenKind::Remove => {
                p.advance();
                body.push(Clause::Remove(parse_remove_items(p)?));
            }
            TokenKind::Delete => {
                p.advance();
                body.push(parse_delete(p, false)?);
            }
            TokenKind::Detach => {
                p.advance();
                p.expect(TokenKind::Delete)?;
                body.push(parse_delete(p, true)?);
            }
            TokenKind::Foreach => {
                p.advance();
                body.push(parse_foreach(p)?);
            }
            kind => {
                return Err(p.error(format!("FOREACH body allows update clauses only, got {kind:?}")));
            }
        }
    }
    p.expect(TokenKind::RParen)?;
    if body.is_empty() {
        return Err(p.error("empty FOREACH body".into()));
    }
    Ok(Clause::Foreach { variable, list, body })
}

fn parse_projection(p: &mut Parser, is_with: bool) -> Result<Projection> {
    let distinct = p.eat(TokenKind::Distinct);

    let items = if p.at(TokenKind::Star) {
        p.advance();
        ProjectionItems::Star
    } else {
        let mut items = vec![parse_projection_item(p)?];
        while p.eat(TokenKind::Comma) {
            items.push(parse_projection_item(p)?);
        }
        ProjectionItems::Items(items)
    };

    let mut order_by = Vec::new();
    if p.at(TokenKind::Order) {
        p.advance();
        p.expect(TokenKind::By)?;
        order_by.push(parse_order_item(p)?);
        while p.eat(TokenKind::Comma) {
            order_by.push(parse_order_item(p)?);
        }
    }

    let skip = if p.eat(TokenKind::Skip) { Some(parse_expr(p)?) } else { None };
    let limit = if p.eat(TokenKind::Limit) { Some(parse_expr(p)?) } else { None };

    let where_clause = if is_with && p.eat(TokenKind::Where) {
        Some(parse_expr(p)?)
    } else {
        None
    };

    Ok(Projection { distinct, items, order_by, skip, limit, where_clause })
}

fn parse_projection_item(p: &mut Parser) -> Result<ProjectionItem> {
    let expr = parse_expr(p)?;
    let alias = if p.eat(TokenKind::As) { Some(p.ident()?) } else { None };
    Ok(ProjectionItem { expr, alias })
}

fn parse_order_item(p: &mut Parser) -> Result<OrderItem> {
    let expr = parse_expr(p)?;
    let ascending = if p.eat(TokenKind::Desc) {
        false
    } else {
        p.eat(TokenKind::Asc);
        true
    };
    Ok(OrderItem { expr, ascending })
}

// ============================================================================
// SET / REMOVE items
// ============================================================================

fn parse_set_items(p: &mut Parser) -> Result<Vec<SetItem>> {
    let mut items = Vec::new();
    loop {
        let variable = p.ident()?;
        if p.eat(TokenKind::Dot) {
            let key = p.ident()?;
            p.expect(TokenKind::Eq)?;
            let value = parse_expr(p)?;
            items.push(SetItem::Property { variable, key, value });
        } else if p.eat(TokenKind::PlusEq) {
            let value = parse_expr(p)?;
            items.push(SetItem::MergeProperties { variable, value });
        } else if p.at(TokenKind::Colon) {
            while p.eat(TokenKind::Colon) {
                let label = p.ident()?;
                items.push(SetItem::Label { variable: variable.clone(), label });
            }
        } else {
            return Err(p.error("expected '.', '+=' or ':' in SET item".into()));
        }
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(items)
}

fn parse_remove_items(p: &mut Parser) -> Result<Vec<RemoveItem>> {
    let mut items = Vec::new();
    loop {
        let variable = p.ident()?;
        if p.eat(TokenKind::Dot) {
            let key = p.ident()?;
            items.push(RemoveItem::Property { variable, key });
        } else if p.at(TokenKind::Colon) {
            while p.eat(TokenKind::Colon) {
                let label = p.ident()?;
                items.push(RemoveItem::Label { variable: variable.clone(), label });
            }
        } else {
            return Err(p.error("expected '.' or ':' in REMOVE item".into()));
        }
        if !p.eat(TokenKind::Comma) {
            break;
        }
    }
    Ok(items)
}

// ============================================================================
// Patterns
// ============================================================================

fn parse_pattern_list(p: &mut Parser) -> Result<Vec<Pattern>> {
    let mut patterns = vec![parse_pattern(p)?];
    while p.eat(TokenKind::Comma) {
        patterns.push(parse_pattern(p)?);
    }
    Ok(patterns)
}

fn parse_pattern(p: &mut Parser) -> Result<Pattern> {
    // `p = (a)-[...]->(b)` — a named path
    let path_alias = if p.at(TokenKind::Identifier) && p.peek_kind_at(1) == TokenKind::Eq {
        let alias = p.ident()?;
        p.expect(TokenKind::Eq)?;
        Some(alias)
    } else {
        None
    };

    let start = parse_node_pattern(p)?;
    let mut chain = Vec::new();
    while p.at(TokenKind::Dash) || p.at(TokenKind::LeftArrow) {
        let rel = parse_rel_pattern(p)?;
        let node = parse_node_pattern(p)?;
        chain.push((rel, node));
    }

    Ok(Pattern { path_alias, start, chain })
}

fn parse_node_pattern(p: &mut Parser) -> Result<NodePattern> {
    p.expect(TokenKind::LParen)?;

    let alias = if matches!(p.peek_kind(), TokenKind::Identifier) {
        Some(p.ident()?)
    } else {
        None
    };

    let mut labels = Vec::new();
    while p.eat(TokenKind::Colon) {
        labels.push(p.ident()?);
    }

    let props = if p.at(TokenKind::LBrace) {
        parse_property_map(p)?
    } else {
        Vec::new()
    };

    p.expect(TokenKind::RParen)?;
    Ok(NodePattern { alias, labels, props })
}

fn parse_rel_pattern(p: &mut Parser) -> Result<RelPattern> {
    // leading `<-` or `-`
    let incoming = if p.eat(TokenKind::LeftArrow) {
        true
    } else {
        p.expect(TokenKind::Dash)?;
        false
    };

    let mut alias = None;
    let mut rel_types = Vec::new();
    let mut props = Vec::new();
    let mut var_length = None;

    if p.eat(TokenKind::LBracket) {
        if matches!(p.peek_kind(), TokenKind::Identifier) {
            alias = Some(p.ident()?);
        }
        if p.eat(TokenKind::Colon) {
            rel_types.push(p.ident()?);
            while p.eat(TokenKind::Pipe) {
                p.eat(TokenKind::Colon); // `|:T` and `|T` both accepted
                rel_types.push(p.ident()?);
            }
        }
        if p.eat(TokenKind::Star) {
            var_length = Some(parse_var_length(p)?);
        }
        if p.at(TokenKind::LBrace) {
            props = parse_property_map(p)?;
        }
        p.expect(TokenKind::RBracket)?;
    }

    // trailing `->` or `-`
    let outgoing = if p.eat(TokenKind::Arrow) {
        true
    } else {
        p.expect(TokenKind::Dash)?;
        false
    };

    let direction = match (incoming, outgoing) {
        (true, true) => return Err(p.error("relationship cannot point both ways".into())),
        (true, false) => PatternDirection::Left,
        (false, true) => PatternDirection::Right,
        (false, false) => PatternDirection::Both,
    };

    Ok(RelPattern { alias, rel_types, direction, props, var_length })
}

fn parse_var_length(p: &mut Parser) -> Result<VarLength> {
    // `*`, `*n`, `*n..m`, `*..m`, `*n..`
    let min = if p.at(TokenKind::Integer) {
        Some(parse_u32(p)?)
    } else {
        None
    };
    if p.eat(TokenKind::DotDot) {
        let max = if p.at(TokenKind::Integer) {
            Some(parse_u32(p)?)
        } else {
            None
        };
        Ok(VarLength { min, max })
    } else {
        // `*n` means exactly n; bare `*` is unbounded
        Ok(VarLength { min, max: min })
    }
}

fn parse_u32(p: &mut Parser) -> Result<u32> {
    let tok = p.expect(TokenKind::Integer)?;
    tok.text
        .parse::<u32>()
        .map_err(|_| Error::Semantic(format!("integer out of range: {}", tok.text)))
}

fn parse_property_map(p: &mut Parser) -> Result<Vec<(String, Expr)>> {
    p.expect(TokenKind::LBrace)?;
    let mut props = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            let key = p.ident()?;
            p.expect(TokenKind::Colon)?;
            let value = parse_expr(p)?;
            props.push((key, value));
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(props)
}

// ============================================================================
// Expressions (precedence climbing)
// ============================================================================

fn parse_expr(p: &mut Parser) -> Result<Expr> {
    parse_or(p)
}

fn parse_or(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_xor(p)?;
    while p.eat(TokenKind::Or) {
        let right = parse_xor(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op: BinaryOp::Or, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_xor(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_and(p)?;
    while p.eat(TokenKind::Xor) {
        let right = parse_and(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op: BinaryOp::Xor, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_and(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_not(p)?;
    while p.eat(TokenKind::And) {
        let right = parse_not(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op: BinaryOp::And, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_not(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Not) {
        let expr = parse_not(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Not, expr: Box::new(expr) })
    } else {
        parse_comparison(p)
    }
}

fn parse_comparison(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_additive(p)?;

    loop {
        match p.peek_kind() {
            TokenKind::Eq | TokenKind::Neq | TokenKind::Lt | TokenKind::Lte
            | TokenKind::Gt | TokenKind::Gte => {
                let op = match p.advance().kind {
                    TokenKind::Eq => BinaryOp::Eq,
                    TokenKind::Neq => BinaryOp::Neq,
                    TokenKind::Lt => BinaryOp::Lt,
                    TokenKind::Lte => BinaryOp::Lte,
                    TokenKind::Gt => BinaryOp::Gt,
                    TokenKind::Gte => BinaryOp::Gte,
                    _ => unreachable!(),
                };
                let right = parse_additive(p)?;
                left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
            }
            TokenKind::In => {
                p.advance();
                let list = parse_additive(p)?;
                left = Expr::In { expr: Box::new(left), list: Box::new(list) };
            }
            TokenKind::Is => {
                p.advance();
                let negated = p.eat(TokenKind::Not);
                p.expect(TokenKind::Null)?;
                left = Expr::IsNull { expr: Box::new(left), negated };
            }
            TokenKind::StartsWith => {
                p.advance();
                p.expect(TokenKind::With)?;
                let right = parse_additive(p)?;
                left = Expr::StringOp { left: Box::new(left), op: StringOp::StartsWith, right: Box::new(right) };
            }
            TokenKind::EndsWith => {
                p.advance();
                p.expect(TokenKind::With)?;
                let right = parse_additive(p)?;
                left = Expr::StringOp { left: Box::new(left), op: StringOp::EndsWith, right: Box::new(right) };
            }
            TokenKind::Contains => {
                p.advance();
                let right = parse_additive(p)?;
                left = Expr::StringOp { left: Box::new(left), op: StringOp::Contains, right: Box::new(right) };
            }
            // `n:Person` label predicate, only on a bare variable
            TokenKind::Colon if matches!(left, Expr::Variable(_)) => {
                p.advance();
                let label = p.ident()?;
                left = Expr::HasLabel { expr: Box::new(left), label };
            }
            _ => break,
        }
    }
    Ok(left)
}

fn parse_additive(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_multiplicative(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Plus => BinaryOp::Add,
            TokenKind::Dash => BinaryOp::Sub,
            _ => break,
        };
        p.advance();
        let right = parse_multiplicative(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_multiplicative(p: &mut Parser) -> Result<Expr> {
    let mut left = parse_unary(p)?;
    loop {
        let op = match p.peek_kind() {
            TokenKind::Star => BinaryOp::Mul,
            TokenKind::Slash => BinaryOp::Div,
            TokenKind::Percent => BinaryOp::Mod,
            TokenKind::Caret => BinaryOp::Pow,
            _ => break,
        };
        p.advance();
        let right = parse_unary(p)?;
        left = Expr::BinaryOp { left: Box::new(left), op, right: Box::new(right) };
    }
    Ok(left)
}

fn parse_unary(p: &mut Parser) -> Result<Expr> {
    if p.eat(TokenKind::Dash) {
        let expr = parse_unary(p)?;
        Ok(Expr::UnaryOp { op: UnaryOp::Negate, expr: Box::new(expr) })
    } else {
        parse_postfix(p)
    }
}

fn parse_postfix(p: &mut Parser) -> Result<Expr> {
    let mut expr = parse_atom(p)?;
    loop {
        if p.eat(TokenKind::Dot) {
            let key = p.ident()?;
            expr = Expr::Property { expr: Box::new(expr), key };
        } else if p.at(TokenKind::LBracket) {
            p.advance();
            let index = parse_expr(p)?;
            p.expect(TokenKind::RBracket)?;
            expr = Expr::Subscript { expr: Box::new(expr), index: Box::new(index) };
        } else if p.at(TokenKind::LBrace) && matches!(expr, Expr::Variable(_)) {
            // map projection: `n {.name, id: id(n), .*}`
            let Expr::Variable(variable) = expr else { unreachable!() };
            expr = parse_map_projection(p, variable)?;
        } else {
            break;
        }
    }
    Ok(expr)
}

fn parse_map_projection(p: &mut Parser, variable: String) -> Result<Expr> {
    p.expect(TokenKind::LBrace)?;
    let mut selectors = Vec::new();
    if !p.at(TokenKind::RBrace) {
        loop {
            if p.eat(TokenKind::Dot) {
                if p.eat(TokenKind::Star) {
                    selectors.push(MapSelector::AllProperties);
                } else {
                    selectors.push(MapSelector::Property(p.ident()?));
                }
            } else {
                let name = p.ident()?;
                if p.eat(TokenKind::Colon) {
                    let value = parse_expr(p)?;
                    selectors.push(MapSelector::Literal(name, value));
                } else {
                    selectors.push(MapSelector::Identifier(name));
                }
            }
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RBrace)?;
    Ok(Expr::MapProjection { variable, selectors })
}

fn parse_atom(p: &mut Parser) -> Result<Expr> {
    match p.peek_kind() {
        TokenKind::Null => { p.advance(); Ok(Expr::Literal(Literal::Null)) }
        TokenKind::True => { p.advance(); Ok(Expr::Literal(Literal::Bool(true))) }
        TokenKind::False => { p.advance(); Ok(Expr::Literal(Literal::Bool(false))) }
        TokenKind::Integer => {
            let text = p.advance().text.clone();
            text.parse::<i64>()
                .map(|i| Expr::Literal(Literal::Int(i)))
                .map_err(|_| Error::Semantic(format!("integer out of range: {text}")))
        }
        TokenKind::Float => {
            let text = p.advance().text.clone();
            text.parse::<f64>()
                .map(|f| Expr::Literal(Literal::Double(f)))
                .map_err(|_| Error::Semantic(format!("malformed float: {text}")))
        }
        TokenKind::StringLiteral => {
            let text = p.advance().text.clone();
            Ok(Expr::Literal(Literal::String(text)))
        }
        TokenKind::Parameter => {
            let name = p.advance().text.clone();
            Ok(Expr::Parameter(name))
        }
        TokenKind::Star => {
            p.advance();
            Ok(Expr::Star)
        }
        TokenKind::LParen => {
            p.advance();
            let expr = parse_expr(p)?;
            p.expect(TokenKind::RParen)?;
            Ok(expr)
        }
        TokenKind::LBracket => {
            p.advance();
            let mut items = Vec::new();
            if !p.at(TokenKind::RBracket) {
                loop {
                    items.push(parse_expr(p)?);
                    if !p.eat(TokenKind::Comma) {
                        break;
                    }
                }
            }
            p.expect(TokenKind::RBracket)?;
            Ok(Expr::List(items))
        }
        TokenKind::LBrace => {
            let entries = parse_property_map(p)?;
            Ok(Expr::Map(entries))
        }
        TokenKind::Case => {
            p.advance();
            parse_case(p)
        }
        TokenKind::Identifier | TokenKind::All => {
            let name = p.ident()?;
            if p.at(TokenKind::LParen) {
                if name.eq_ignore_ascii_case("reduce") {
                    parse_reduce(p)
                } else {
                    parse_function_call(p, name)
                }
            } else {
                Ok(Expr::Variable(name))
            }
        }
        kind => Err(p.error(format!("unexpected token {kind:?} in expression"))),
    }
}

fn parse_function_call(p: &mut Parser, name: String) -> Result<Expr> {
    p.expect(TokenKind::LParen)?;
    let distinct = p.eat(TokenKind::Distinct);
    let mut args = Vec::new();
    if !p.at(TokenKind::RParen) {
        loop {
            args.push(parse_expr(p)?);
            if !p.eat(TokenKind::Comma) {
                break;
            }
        }
    }
    p.expect(TokenKind::RParen)?;
    Ok(Expr::FunctionCall { name, args, distinct })
}

fn parse_reduce(p: &mut Parser) -> Result<Expr> {
    // reduce(acc = init, x IN list | acc + x)
    p.expect(TokenKind::LParen)?;
    let acc = p.ident()?;
    p.expect(TokenKind::Eq)?;
    let init = parse_expr(p)?;
    p.expect(TokenKind::Comma)?;
    let variable = p.ident()?;
    p.expect(TokenKind::In)?;
    let list = parse_expr(p)?;
    p.expect(TokenKind::Pipe)?;
    let expr = parse_expr(p)?;
    p.expect(TokenKind::RParen)?;
    Ok(Expr::Reduce {
        acc,
        init: Box::new(init),
        variable,
        list: Box::new(list),
        expr: Box::new(expr),
    })
}

fn parse_case(p: &mut Parser) -> Result<Expr> {
    let operand = if !p.at(TokenKind::When) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };

    let mut whens = Vec::new();
    while p.eat(TokenKind::When) {
        let when = parse_expr(p)?;
        p.expect(TokenKind::Then)?;
        let then = parse_expr(p)?;
        whens.push((when, then));
    }
    if whens.is_empty() {
        return Err(p.error("CASE requires at least one WHEN".into()));
    }

    let else_expr = if p.eat(TokenKind::Else) {
        Some(Box::new(parse_expr(p)?))
    } else {
        None
    };
    p.expect(TokenKind::End)?;

    Ok(Expr::Case { operand, whens, else_expr })
}

// ============================================================================
// Schema commands
// ============================================================================

fn parse_schema_command(p: &mut Parser) -> Result<SchemaCommand> {
    if p.eat(TokenKind::Drop) {
        if p.eat(TokenKind::Index) {
            p.expect(TokenKind::On)?;
            let (label, properties) = parse_label_props(p)?;
            return Ok(SchemaCommand::DropIndex { label, properties });
        }
        p.expect(TokenKind::Constraint)?;
        p.expect(TokenKind::On)?;
        p.expect(TokenKind::Colon)?;
        let label = p.ident()?;
        let unique = if p.eat(TokenKind::Unique) {
            true
        } else {
            p.expect(TokenKind::Mandatory)?;
            false
        };
        let properties = parse_prop_list(p)?;
        return Ok(SchemaCommand::DropConstraint { label, properties, unique });
    }

    p.expect(TokenKind::Create)?;
    if p.eat(TokenKind::Fulltext) {
        p.expect(TokenKind::Index)?;
        p.expect(TokenKind::On)?;
        let (label, properties) = parse_label_props(p)?;
        return Ok(SchemaCommand::CreateFullTextIndex { label, properties });
    }
    if p.eat(TokenKind::Index) {
        p.expect(TokenKind::On)?;
        let (label, properties) = parse_label_props(p)?;
        return Ok(SchemaCommand::CreateExactIndex { label, properties });
    }
    p.expect(TokenKind::Constraint)?;
    p.expect(TokenKind::On)?;
    p.expect(TokenKind::Colon)?;
    let label = p.ident()?;
    if p.eat(TokenKind::Unique) {
        let properties = parse_prop_list(p)?;
        Ok(SchemaCommand::CreateUniqueConstraint { label, properties })
    } else {
        p.expect(TokenKind::Mandatory)?;
        let properties = parse_prop_list(p)?;
        Ok(SchemaCommand::CreateMandatoryConstraint { label, properties })
    }
}

/// `:Label(prop, prop, …)`
fn parse_label_props(p: &mut Parser) -> Result<(String, Vec<String>)> {
    p.expect(TokenKind::Colon)?;
    let label = p.ident()?;
    let properties = parse_prop_list(p)?;
    Ok((label, properties))
}

fn parse_prop_list(p: &mut Parser) -> Result<Vec<String>> {
    p.expect(TokenKind::LParen)?;
    let mut properties = vec![p.ident()?];
    while p.eat(TokenKind::Comma) {
        properties.push(p.ident()?);
    }
    p.expect(TokenKind::RParen)?;
    Ok(properties)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cypher::lexer::tokenize;

    fn parse(q: &str) -> Ast {
        parse_ast(&tokenize(q).unwrap()).unwrap()
    }

    fn query(q: &str) -> Statement {
        match parse(q) {
            Ast::Query(s) => s,
            other => panic!("expected query, got {other:?}"),
        }
    }

    #[test]
    fn test_match_return() {
        let stmt = query("MATCH (n:Person) RETURN n");
        assert_eq!(stmt.segments.len(), 1);
        let clauses = &stmt.segments[0].clauses;
        assert!(matches!(clauses[0], Clause::Match { optional: false, .. }));
        assert!(matches!(clauses[1], Clause::Return(_)));
    }

    #[test]
    fn test_pattern_chain() {
        let stmt = query("MATCH (a:Person)-[:KNOWS]->(b:Person) RETURN a.name, b.name");
        let Clause::Match { patterns, .. } = &stmt.segments[0].clauses[0] else { panic!() };
        assert_eq!(patterns.len(), 1);
        assert_eq!(patterns[0].chain.len(), 1);
        let (rel, node) = &patterns[0].chain[0];
        assert_eq!(rel.rel_types, vec!["KNOWS"]);
        assert_eq!(rel.direction, PatternDirection::Right);
        assert_eq!(node.labels, vec!["Person"]);
    }

    #[test]
    fn test_var_length_forms() {
        let get = |q: &str| -> VarLength {
            let stmt = query(q);
            let Clause::Match { patterns, .. } = &stmt.segments[0].clauses[0] else { panic!() };
            patterns[0].chain[0].0.var_length.unwrap()
        };
        assert_eq!(get("MATCH (a)-[:R*]->(b) RETURN b"), VarLength { min: None, max: None });
        assert_eq!(get("MATCH (a)-[:R*2]->(b) RETURN b"), VarLength { min: Some(2), max: Some(2) });
        assert_eq!(get("MATCH (a)-[:R*1..3]->(b) RETURN b"), VarLength { min: Some(1), max: Some(3) });
        assert_eq!(get("MATCH (a)-[:R*..3]->(b) RETURN b"), VarLength { min: None, max: Some(3) });
    }

    #[test]
    fn test_named_path() {
        let stmt = query("MATCH p = (a)-[:R]->(b) RETURN p");
        let Clause::Match { patterns, .. } = &stmt.segments[0].clauses[0] else { panic!() };
        assert_eq!(patterns[0].path_alias.as_deref(), Some("p"));
    }

    #[test]
    fn test_undirected() {
        let stmt = query("MATCH (a)-[r]-(b) RETURN r");
        let Clause::Match { patterns, .. } = &stmt.segments[0].clauses[0] else { panic!() };
        assert_eq!(patterns[0].chain[0].0.direction, PatternDirection::Both);
    }

    #[test]
    fn test_create_with_props() {
        let stmt = query("CREATE (n:Person {name: 'Roi', age: 30})");
        let Clause::Create { patterns } = &stmt.segments[0].clauses[0] else { panic!() };
        assert_eq!(patterns[0].start.props.len(), 2);
    }

    #[test]
    fn test_merge_on_create_on_match() {
        let stmt = query("MERGE (n:User {id: 1}) ON CREATE SET n.created = true ON MATCH SET n.seen = true");
        let Clause::Merge { on_create, on_match, .. } = &stmt.segments[0].clauses[0] else { panic!() };
        assert_eq!(on_create.len(), 1);
        assert_eq!(on_match.len(), 1);
    }

    #[test]
    fn test_delete_detach() {
        let stmt = query("MATCH (n) DETACH DELETE n");
        assert!(matches!(
            stmt.segments[0].clauses[1],
            Clause::Delete { detach: true, .. }
        ));
    }

    #[test]
    fn test_with_pipeline() {
        let stmt = query("MATCH (n) WITH n.age AS age WHERE age > 10 RETURN age ORDER BY age DESC LIMIT 5");
        let Clause::With(proj) = &stmt.segments[0].clauses[1] else { panic!() };
        assert!(proj.where_clause.is_some());
        let Clause::Return(ret) = &stmt.segments[0].clauses[2] else { panic!() };
        assert_eq!(ret.order_by.len(), 1);
        assert!(!ret.order_by[0].ascending);
        assert!(ret.limit.is_some());
    }

    #[test]
    fn test_union() {
        let stmt = query("MATCH (a:A) RETURN a.x UNION ALL MATCH (b:B) RETURN b.x");
        assert_eq!(stmt.segments.len(), 2);
        assert_eq!(stmt.union_all, vec![true]);
    }

    #[test]
    fn test_unwind_foreach() {
        let stmt = query("UNWIND [1,2,3] AS x FOREACH (y IN [x] | CREATE (:N {v: y})) RETURN x");
        assert!(matches!(stmt.segments[0].clauses[0], Clause::Unwind { .. }));
        assert!(matches!(stmt.segments[0].clauses[1], Clause::Foreach { .. }));
    }

    #[test]
    fn test_expression_precedence() {
        let stmt = query("RETURN 1 + 2 * 3 = 7");
        let Clause::Return(proj) = &stmt.segments[0].clauses[0] else { panic!() };
        let ProjectionItems::Items(items) = &proj.items else { panic!() };
        // top must be Eq
        assert!(matches!(
            items[0].expr,
            Expr::BinaryOp { op: BinaryOp::Eq, .. }
        ));
    }

    #[test]
    fn test_case_reduce_map_projection() {
        query("RETURN CASE WHEN 1 > 0 THEN 'yes' ELSE 'no' END");
        query("RETURN reduce(acc = 0, x IN [1,2,3] | acc + x)");
        query("MATCH (n) RETURN n {.name, id: id(n), .*}");
    }

    #[test]
    fn test_schema_commands() {
        assert!(matches!(
            parse("CREATE INDEX ON :Person(name)"),
            Ast::Schema(SchemaCommand::CreateExactIndex { .. })
        ));
        assert!(matches!(
            parse("CREATE FULLTEXT INDEX ON :Movie(title, plot)"),
            Ast::Schema(SchemaCommand::CreateFullTextIndex { .. })
        ));
        assert!(matches!(
            parse("DROP INDEX ON :Person(name)"),
            Ast::Schema(SchemaCommand::DropIndex { .. })
        ));
        assert!(matches!(
            parse("CREATE CONSTRAINT ON :User UNIQUE(email)"),
            Ast::Schema(SchemaCommand::CreateUniqueConstraint { .. })
        ));
        assert!(matches!(
            parse("CREATE CONSTRAINT ON :User MANDATORY(email)"),
            Ast::Schema(SchemaCommand::CreateMandatoryConstraint { .. })
        ));
    }

    #[test]
    fn test_syntax_error_reports_position() {
        let tokens = tokenize("MATCH (n RETURN n").unwrap();
        let err = parse_ast(&tokens).unwrap_err();
        assert!(matches!(err, Error::Syntax { .. }));
    }
}
