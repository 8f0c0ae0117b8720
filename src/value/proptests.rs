//! Generative round-trip coverage for the value codec.

use proptest::prelude::*;
use proptest::strategy::BoxedStrategy;

use crate::buf::Buffer;
use crate::protocol::Endianness;
use crate::signature::Type;
use crate::value::Value;

fn arb_type(depth: u32) -> BoxedStrategy<Type> {
    let leaf = prop_oneof![
        Just(Type::Byte),
        Just(Type::Boolean),
        Just(Type::Int16),
        Just(Type::UInt16),
        Just(Type::Int32),
        Just(Type::UInt32),
        Just(Type::Int64),
        Just(Type::UInt64),
        Just(Type::Double),
        Just(Type::String),
    ];

    if depth == 0 {
        return leaf.boxed();
    }

    let key = prop_oneof![
        Just(Type::String),
        Just(Type::Byte),
        Just(Type::UInt32),
        Just(Type::Int64),
    ];

    prop_oneof![
        4 => leaf,
        1 => Just(Type::Variant),
        2 => arb_type(depth - 1).prop_map(|ty| Type::Array(Box::new(ty))),
        2 => prop::collection::vec(arb_type(depth - 1), 1..4).prop_map(Type::Struct),
        1 => (key, arb_type(depth - 1)).prop_map(|(key, value)| {
            Type::Array(Box::new(Type::DictEntry(Box::new(key), Box::new(value))))
        }),
    ]
    .boxed()
}

fn arb_string() -> impl Strategy<Value = String> {
    ".{0,12}"
}

fn value_for(ty: &Type) -> BoxedStrategy<Value> {
    match ty {
        Type::Byte => any::<u8>().prop_map(Value::Byte).boxed(),
        Type::Boolean => any::<bool>().prop_map(Value::Boolean).boxed(),
        Type::Int16 => any::<i16>().prop_map(Value::Int16).boxed(),
        Type::UInt16 => any::<u16>().prop_map(Value::UInt16).boxed(),
        Type::Int32 => any::<i32>().prop_map(Value::Int32).boxed(),
        Type::UInt32 => any::<u32>().prop_map(Value::UInt32).boxed(),
        Type::Int64 => any::<i64>().prop_map(Value::Int64).boxed(),
        Type::UInt64 => any::<u64>().prop_map(Value::UInt64).boxed(),
        Type::Double => prop_oneof![
            any::<f64>(),
            Just(f64::NAN),
            Just(f64::INFINITY),
            Just(f64::NEG_INFINITY),
            Just(0.0),
            Just(-0.0),
        ]
        .prop_map(Value::Double)
        .boxed(),
        Type::String => arb_string().prop_map(Value::String).boxed(),
        Type::ObjectPath => Just(Value::ObjectPath("/an/object".into())).boxed(),
        Type::Signature => Just(Value::Signature("a{sv}".into())).boxed(),
        Type::Variant => arb_type(1)
            .prop_flat_map(|ty| value_for(&ty))
            .prop_map(|value| Value::Variant(Box::new(value)))
            .boxed(),
        Type::Array(element) => match &**element {
            Type::DictEntry(key, value) => {
                let key_ty = (**key).clone();
                let value_ty = (**value).clone();

                prop::collection::vec((value_for(key), value_for(value)), 0..3)
                    .prop_map(move |entries| {
                        Value::Dict(key_ty.clone(), value_ty.clone(), entries)
                    })
                    .boxed()
            }
            _ => {
                let element_ty = (**element).clone();

                prop::collection::vec(value_for(element), 0..3)
                    .prop_map(move |values| Value::Array(element_ty.clone(), values))
                    .boxed()
            }
        },
        Type::Struct(fields) => fields
            .iter()
            .map(value_for)
            .collect::<Vec<_>>()
            .prop_map(Value::Struct)
            .boxed(),
        Type::DictEntry(..) | Type::Tuple(..) => unreachable!("not generated standalone"),
    }
}

fn arb_typed_value() -> impl Strategy<Value = (Type, Value)> {
    arb_type(3).prop_flat_map(|ty| {
        let value = value_for(&ty);
        (Just(ty), value)
    })
}

/// Equality with the NaN tolerance clause: a NaN read back equals the NaN
/// that was written.
fn eq_values(a: &Value, b: &Value) -> bool {
    match (a, b) {
        (Value::Double(a), Value::Double(b)) => (a.is_nan() && b.is_nan()) || a == b,
        (Value::Array(at, avs), Value::Array(bt, bvs)) => {
            at == bt && avs.len() == bvs.len() && avs.iter().zip(bvs).all(|(a, b)| eq_values(a, b))
        }
        (Value::Dict(ak, av, aes), Value::Dict(bk, bv, bes)) => {
            ak == bk
                && av == bv
                && aes.len() == bes.len()
                && aes
                    .iter()
                    .zip(bes)
                    .all(|((ka, va), (kb, vb))| eq_values(ka, kb) && eq_values(va, vb))
        }
        (Value::Struct(avs), Value::Struct(bvs)) => {
            avs.len() == bvs.len() && avs.iter().zip(bvs).all(|(a, b)| eq_values(a, b))
        }
        (Value::Variant(a), Value::Variant(b)) => eq_values(a, b),
        _ => a == b,
    }
}

proptest! {
    #[test]
    fn value_round_trip((ty, value) in arb_typed_value()) {
        let mut buf = Buffer::with_endianness(Endianness::LITTLE);
        value.write(&mut buf, 0).unwrap();
        buf.flip();
        let written = buf.limit();

        let read = Value::read(&mut buf, 0, &ty).unwrap();
        prop_assert!(eq_values(&read, &value), "{read:?} != {value:?}");
        // Reading consumes exactly what writing produced.
        prop_assert_eq!(buf.cursor(), written);
    }

    #[test]
    fn value_round_trip_big_endian((ty, value) in arb_typed_value()) {
        let mut buf = Buffer::with_endianness(Endianness::BIG);
        value.write(&mut buf, 0).unwrap();
        buf.flip();

        let read = Value::read(&mut buf, 0, &ty).unwrap();
        prop_assert!(eq_values(&read, &value), "{read:?} != {value:?}");
    }

    #[test]
    fn signature_round_trip(ty in arb_type(3)) {
        let rendered = ty.render();
        prop_assert_eq!(Type::parse(&rendered).unwrap(), ty);
    }

    #[test]
    fn alignment_invariant((ty, value) in arb_typed_value(), lead in 0usize..8) {
        // Values written after arbitrary lead bytes still align relative to
        // the origin.
        let mut buf = Buffer::with_endianness(Endianness::LITTLE);

        for _ in 0..lead {
            buf.store_u8(0xaa).unwrap();
        }

        let origin = buf.cursor();
        value.write(&mut buf, origin).unwrap();
        buf.flip();

        buf.set_cursor(origin);
        let read = Value::read(&mut buf, origin, &ty).unwrap();
        prop_assert!(eq_values(&read, &value));
        prop_assert_eq!(buf.cursor(), buf.limit());
    }
}
