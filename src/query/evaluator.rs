use tracing::warn;

use crate::bitstream::Bitstream;
use crate::core::error::{Error, ErrorKind, Result};
use crate::core::types::Value;
use crate::index::args::ArgIndex;
use crate::index::meta::MetaIndex;
use crate::query::ast::{Expr, Relation};

/// Pads the shorter operand with zero bits so both cover the same rows.
fn align(a: &mut Bitstream, b: &mut Bitstream) {
    let len = a.len().max(b.len());
    a.append(len - a.len(), false);
    b.append(len - b.len(), false);
}

/// Evaluates a predicate tree against one partition's meta and argument
/// indexes, producing the bitstream of matching event IDs.
///
/// Leaves resolve through the indexes; connectives combine the child
/// bitstreams with bitstream algebra. An unsupported leaf aborts the
/// whole evaluation.
pub struct Evaluator<'a> {
    meta: &'a MetaIndex,
    args: &'a ArgIndex,
    rows: u64,
    warned_id_extractor: bool,
}

impl<'a> Evaluator<'a> {
    pub fn new(meta: &'a MetaIndex, args: &'a ArgIndex) -> Self {
        Evaluator {
            meta,
            args,
            rows: meta.size(),
            warned_id_extractor: false,
        }
    }

    pub fn evaluate(&mut self, expr: &Expr) -> Result<Bitstream> {
        let mut result = self.visit(expr)?;
        if result.len() < self.rows {
            result.append(self.rows - result.len(), false);
        }
        Ok(result)
    }

    fn visit(&mut self, expr: &Expr) -> Result<Bitstream> {
        match expr {
            Expr::Relation(rel) => self.relation(rel),
            Expr::And(children) => self.connective(children, |a, b| a & b),
            Expr::Or(children) => self.connective(children, |a, b| a | b),
            Expr::Not(child) => {
                let mut bs = self.visit(child)?;
                if bs.len() < self.rows {
                    bs.append(self.rows - bs.len(), false);
                }
                bs.flip();
                Ok(bs)
            }
            _ => Err(Error::new(
                ErrorKind::InvalidArgument,
                "expression must be a relation or a boolean connective",
            )),
        }
    }

    fn connective(
        &mut self,
        children: &[Expr],
        combine: fn(&Bitstream, &Bitstream) -> Bitstream,
    ) -> Result<Bitstream> {
        let mut iter = children.iter();
        let first = iter.next().ok_or_else(|| {
            Error::new(ErrorKind::InvalidArgument, "empty boolean connective")
        })?;
        let mut acc = self.visit(first)?;
        for child in iter {
            let mut bs = self.visit(child)?;
            align(&mut acc, &mut bs);
            acc = combine(&acc, &bs);
        }
        Ok(acc)
    }

    /// Visits the constant operand first, then dispatches on the
    /// extractor.
    fn relation(&mut self, rel: &Relation) -> Result<Bitstream> {
        let value = match rel.rhs.as_ref() {
            Expr::Constant(value) => value,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "right operand of a relation must be a constant",
                ))
            }
        };
        let op = rel.op;
        let result = match rel.lhs.as_ref() {
            Expr::NameExtractor => match value {
                Value::Str(name) => self.meta.lookup_name(op, name)?,
                _ => {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "name extractor requires a string constant",
                    ))
                }
            },
            Expr::TimestampExtractor => match value {
                Value::Timestamp(ns) => self.meta.lookup_timestamp(op, *ns)?,
                _ => {
                    return Err(Error::new(
                        ErrorKind::InvalidArgument,
                        "timestamp extractor requires a timestamp constant",
                    ))
                }
            },
            Expr::IdExtractor => {
                if !self.warned_id_extractor {
                    self.warned_id_extractor = true;
                    warn!("id extractor is not implemented; yielding no results");
                }
                None
            }
            Expr::OffsetExtractor(offset) => self.args.lookup_offset(offset, op, value)?,
            Expr::TypeExtractor(kind) => self.args.lookup_type(*kind, op, value)?,
            _ => {
                return Err(Error::new(
                    ErrorKind::InvalidArgument,
                    "left operand of a relation must be an extractor",
                ))
            }
        };
        let mut bs = result.unwrap_or_default();
        if bs.len() < self.rows {
            bs.append(self.rows - bs.len(), false);
        }
        Ok(bs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::bitmap::RelOp;
    use crate::core::types::{
        Event, EventId, FieldType, Offset, Record, RecordField, RecordType, TypeKind,
    };
    use crate::index::value_index::IndexOptions;
    use std::sync::Arc;

    fn conn_type() -> Arc<RecordType> {
        Arc::new(RecordType::new(
            "conn",
            vec![
                RecordField {
                    name: "bytes".to_string(),
                    ty: FieldType::Kind(TypeKind::UInt),
                },
                RecordField {
                    name: "service".to_string(),
                    ty: FieldType::Kind(TypeKind::Str),
                },
            ],
        ))
    }

    fn indexes() -> (MetaIndex, ArgIndex) {
        let mut meta = MetaIndex::new();
        let mut args = ArgIndex::new(IndexOptions::default());
        let ty = conn_type();
        let events = [
            (1u64, 1_000_000_000i64, 100u64, "dns"),
            (2, 2_000_000_000, 200, "http"),
            (3, 3_000_000_000, 300, "dns"),
        ];
        for (id, ts, bytes, service) in events {
            let mut e = Event::new(
                ty.clone(),
                Record::new(vec![
                    Value::UInt(bytes),
                    Value::Str(service.to_string()),
                ]),
                ts,
            );
            e.id = EventId(id);
            meta.index(&e).unwrap();
            args.index(&e).unwrap();
        }
        (meta, args)
    }

    #[test]
    fn conjunction_of_meta_and_args() {
        let (meta, args) = indexes();
        let expr = Expr::And(vec![
            Expr::name_is("conn"),
            Expr::field(
                Offset::new(vec![1]),
                RelOp::Eq,
                Value::Str("dns".to_string()),
            ),
        ]);
        let mut eval = Evaluator::new(&meta, &args);
        let hits = eval.evaluate(&expr).unwrap();
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![1, 3]);
    }

    #[test]
    fn negation_complements() {
        let (meta, args) = indexes();
        let expr = Expr::Not(Box::new(Expr::field(
            Offset::new(vec![1]),
            RelOp::Eq,
            Value::Str("dns".to_string()),
        )));
        let mut eval = Evaluator::new(&meta, &args);
        let hits = eval.evaluate(&expr).unwrap();
        // Complement covers the reserved slot too; the store masks it
        // against known IDs downstream.
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![0, 2]);
    }

    #[test]
    fn timestamp_range() {
        let (meta, args) = indexes();
        let expr = Expr::timestamp(RelOp::Gt, 1_500_000_000);
        let mut eval = Evaluator::new(&meta, &args);
        let hits = eval.evaluate(&expr).unwrap();
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![2, 3]);
    }

    #[test]
    fn type_extractor_matches_any_field() {
        let (meta, args) = indexes();
        let expr = Expr::typed(RelOp::Eq, Value::Str("http".to_string()));
        let mut eval = Evaluator::new(&meta, &args);
        let hits = eval.evaluate(&expr).unwrap();
        assert_eq!(hits.ones().collect::<Vec<_>>(), vec![2]);
    }

    #[test]
    fn id_extractor_yields_empty() {
        let (meta, args) = indexes();
        let expr = Expr::relation(
            RelOp::Eq,
            Expr::IdExtractor,
            Expr::Constant(Value::UInt(1)),
        );
        let mut eval = Evaluator::new(&meta, &args);
        let hits = eval.evaluate(&expr).unwrap();
        assert_eq!(hits.count_ones(), 0);
        assert_eq!(hits.len(), meta.size());
    }

    #[test]
    fn unsupported_operator_short_circuits() {
        let (meta, args) = indexes();
        // < on the equality-coded name bitmap is unsupported.
        let expr = Expr::And(vec![
            Expr::relation(
                RelOp::Lt,
                Expr::NameExtractor,
                Expr::Constant(Value::Str("zzz".to_string())),
            ),
            Expr::name_is("conn"),
        ]);
        let mut eval = Evaluator::new(&meta, &args);
        let err = eval.evaluate(&expr).unwrap_err();
        assert_eq!(err.kind, ErrorKind::UnsupportedQuery);
    }

    #[test]
    fn malformed_relation_rejected() {
        let (meta, args) = indexes();
        let expr = Expr::relation(
            RelOp::Eq,
            Expr::Constant(Value::UInt(1)),
            Expr::Constant(Value::UInt(1)),
        );
        let mut eval = Evaluator::new(&meta, &args);
        assert!(eval.evaluate(&expr).is_err());
    }
}
