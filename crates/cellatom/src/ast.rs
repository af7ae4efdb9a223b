//! The CellAtom abstract syntax tree.
//!
//! A [`Program`] owns a flat arena of [`Node`]s plus the ordered list of
//! top-level statements. Operands refer to nodes by [`NodeId`], so the whole
//! AST forms a DAG rooted at the statement list and is dropped wholesale with
//! the `Program`. Nodes are built once by the front-end and are immutable
//! afterwards.

use std::fmt;

/// A reference to a node in a [`Program`]'s arena.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct NodeId(u32);

impl NodeId {
    fn index(self) -> usize {
        self.0 as usize
    }
}

/// A register index as the source language encodes it.
///
/// Indices `0..=9` are the per-cell locals `a0..a9`, `10..=19` the per-step
/// globals `g0..g9` and `21` is `v`, the current cell value. Index `20` and
/// indices above `21` are representable but undefined: reads yield `-1` and
/// writes are dropped.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Debug)]
pub struct Reg(u8);

/// The decoded meaning of a [`Reg`] index.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum RegClass {
    /// A per-cell scratch register `aK`, zeroed at cell entry.
    Local(u8),
    /// A per-step register `gK`, zeroed at step entry and carried across
    /// cells in visitation order.
    Global(u8),
    /// The current cell value `v`.
    Cell,
    /// An index with no defined register behind it.
    Undefined,
}

impl Reg {
    /// The `v` register.
    pub const V: Reg = Reg(21);

    /// The local register `a<n>`. Panics if `n` is not in `0..=9`.
    pub fn local(n: u8) -> Reg {
        assert!(n < 10, "no such local register a{n}");
        Reg(n)
    }

    /// The global register `g<n>`. Panics if `n` is not in `0..=9`.
    pub fn global(n: u8) -> Reg {
        assert!(n < 10, "no such global register g{n}");
        Reg(10 + n)
    }

    /// A register from its raw index, defined or not.
    pub fn from_index(index: u8) -> Reg {
        Reg(index)
    }

    /// The raw index this register is encoded as.
    pub fn index(self) -> u8 {
        self.0
    }

    /// Decode the index into its register class.
    pub fn class(self) -> RegClass {
        match self.0 {
            n @ 0..=9 => RegClass::Local(n),
            n @ 10..=19 => RegClass::Global(n - 10),
            21 => RegClass::Cell,
            _ => RegClass::Undefined,
        }
    }
}

impl fmt::Display for Reg {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self.class() {
            RegClass::Local(n) => write!(f, "a{n}"),
            RegClass::Global(n) => write!(f, "g{n}"),
            RegClass::Cell => write!(f, "v"),
            RegClass::Undefined => write!(f, "r{}", self.0),
        }
    }
}

/// An operand of a statement or expression.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum Operand {
    /// A nested expression.
    Node(NodeId),
    /// A signed 16-bit integer literal.
    Literal(i16),
    /// A register reference.
    Register(Reg),
}

/// The binary statement operators.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum BinaryOp {
    /// `+`: wrapping addition.
    Add,
    /// `-`: wrapping subtraction.
    Sub,
    /// `*`: wrapping multiplication.
    Mul,
    /// `/`: truncating signed division; division by zero traps.
    Div,
    /// `=`: the right-hand value, ignoring the destination's current value.
    Assign,
    /// `min`: the signed minimum of both sides.
    Min,
    /// `max`: the signed maximum of both sides.
    Max,
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.write_str(match self {
            BinaryOp::Add => "+",
            BinaryOp::Sub => "-",
            BinaryOp::Mul => "*",
            BinaryOp::Div => "/",
            BinaryOp::Assign => "=",
            BinaryOp::Min => "min",
            BinaryOp::Max => "max",
        })
    }
}

/// One entry of a [`RangeTable`]: an inclusive `[min, max]` band and the
/// operand produced when the key falls inside it.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub struct RangeEntry {
    /// Inclusive lower bound.
    pub min: i16,
    /// Inclusive upper bound.
    pub max: i16,
    /// The operand evaluated when this entry is the first match.
    pub result: Operand,
}

/// An ordered first-match classifier over a key operand.
///
/// The first entry with `min <= key <= max` wins; a key matching no entry
/// produces `0`. Side effects of a `result` expression happen only when its
/// entry is selected.
#[derive(Clone, PartialEq, Eq, Debug)]
pub struct RangeTable {
    /// The operand being classified, evaluated exactly once.
    pub key: Operand,
    /// The entries, tested in order.
    pub entries: Vec<RangeEntry>,
}

/// An AST node.
#[derive(Clone, PartialEq, Eq, Debug)]
pub enum Node {
    /// A binary statement `op dst src`. The destination is loaded first, the
    /// r-value second, and the result is stored back into the destination
    /// register. Evaluated as an r-value it yields the stored-back value.
    Binary {
        /// The operator.
        op: BinaryOp,
        /// The destination; must decode as a register for the store to
        /// happen.
        dst: Operand,
        /// The r-value operand.
        src: Operand,
    },
    /// A range-map expression; always an r-value.
    RangeMap(RangeTable),
    /// A loop over the in-grid neighbours of the current cell. For each
    /// visited neighbour its value is loaded into `a0` and the body
    /// statements run in order. Evaluated as an r-value it yields `0`.
    Neighbours {
        /// The body statements, run once per visited neighbour.
        body: Vec<NodeId>,
    },
}

/// A complete CellAtom program: the node arena plus the ordered top-level
/// statement list.
#[derive(Clone, Default, PartialEq, Eq, Debug)]
pub struct Program {
    nodes: Vec<Node>,
    statements: Vec<NodeId>,
}

impl Program {
    /// An empty program. Running it copies the old grid into the new one.
    pub fn new() -> Program {
        Program::default()
    }

    /// Add a node to the arena and return its id.
    pub fn push(&mut self, node: Node) -> NodeId {
        let id = NodeId(u32::try_from(self.nodes.len()).expect("AST too large"));
        self.nodes.push(node);
        id
    }

    /// Append a node to the top-level statement list.
    pub fn push_statement(&mut self, id: NodeId) {
        self.statements.push(id);
    }

    /// The node behind `id`.
    pub fn node(&self, id: NodeId) -> &Node {
        &self.nodes[id.index()]
    }

    /// The top-level statements in execution order.
    pub fn statements(&self) -> &[NodeId] {
        &self.statements
    }

    fn fmt_operand(&self, op: Operand, f: &mut fmt::Formatter) -> fmt::Result {
        match op {
            Operand::Literal(n) => write!(f, "{n}"),
            Operand::Register(r) => write!(f, "{r}"),
            Operand::Node(id) => self.fmt_node(id, f),
        }
    }

    fn fmt_node(&self, id: NodeId, f: &mut fmt::Formatter) -> fmt::Result {
        match self.node(id) {
            Node::Binary { op, dst, src } => {
                write!(f, "{op} ")?;
                self.fmt_operand(*dst, f)?;
                f.write_str(" ")?;
                self.fmt_operand(*src, f)
            }
            Node::RangeMap(table) => {
                f.write_str("[ ")?;
                self.fmt_operand(table.key, f)?;
                f.write_str(" |")?;
                for entry in &table.entries {
                    write!(f, " ({}, {}) => ", entry.min, entry.max)?;
                    self.fmt_operand(entry.result, f)?;
                    f.write_str(",")?;
                }
                f.write_str(" ]")
            }
            Node::Neighbours { body } => {
                f.write_str("neighbours (")?;
                for stmt in body {
                    f.write_str(" ")?;
                    self.fmt_node(*stmt, f)?;
                }
                f.write_str(" )")
            }
        }
    }
}

/// Human-readable dump of the program, one top-level statement per line. Not
/// round-trippable; meant for debugging.
impl fmt::Display for Program {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        for stmt in &self.statements {
            self.fmt_node(*stmt, f)?;
            f.write_str("\n")?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn register_classes() {
        assert_eq!(Reg::local(0).class(), RegClass::Local(0));
        assert_eq!(Reg::local(9).class(), RegClass::Local(9));
        assert_eq!(Reg::global(0).class(), RegClass::Global(0));
        assert_eq!(Reg::global(9).index(), 19);
        assert_eq!(Reg::V.class(), RegClass::Cell);
        assert_eq!(Reg::from_index(20).class(), RegClass::Undefined);
        assert_eq!(Reg::from_index(22).class(), RegClass::Undefined);
        assert_eq!(Reg::from_index(7).class(), RegClass::Local(7));
    }

    #[test]
    #[should_panic]
    fn local_register_out_of_range() {
        Reg::local(10);
    }

    #[test]
    fn display_round() {
        let mut program = Program::new();
        let count = program.push(Node::Binary {
            op: BinaryOp::Add,
            dst: Operand::Register(Reg::local(1)),
            src: Operand::Register(Reg::local(0)),
        });
        let neighbours = program.push(Node::Neighbours { body: vec![count] });
        program.push_statement(neighbours);
        let map = program.push(Node::RangeMap(RangeTable {
            key: Operand::Register(Reg::local(1)),
            entries: vec![
                RangeEntry {
                    min: 3,
                    max: 3,
                    result: Operand::Literal(1),
                },
                RangeEntry {
                    min: 2,
                    max: 2,
                    result: Operand::Register(Reg::V),
                },
                RangeEntry {
                    min: 0,
                    max: 8,
                    result: Operand::Literal(0),
                },
            ],
        }));
        let assign = program.push(Node::Binary {
            op: BinaryOp::Assign,
            dst: Operand::Register(Reg::V),
            src: Operand::Node(map),
        });
        program.push_statement(assign);

        assert_eq!(
            program.to_string(),
            "neighbours ( + a1 a0 )\n\
             = v [ a1 | (3, 3) => 1, (2, 2) => v, (0, 8) => 0, ]\n"
        );
    }
}
