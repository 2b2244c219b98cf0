//! Random operation sequences checked against an in-memory model of the table

use proptest::prelude::*;
use rtlink_common::device::DeviceType;
use rtlink_common::value::{ParamType, Value};
use rtlink_shm::{RegionHandle, RegionOwner, ShmError};
use std::collections::HashMap;
use tempfile::TempDir;

const CAPACITY: usize = 4;
const IDS: [&str; 6] = ["alpha", "beta", "gamma", "delta", "eps", "zeta"];

#[derive(Debug, Clone)]
enum Op {
    Add { id: usize, ty: usize },
    Remove { id: usize },
    Set { id: usize, param: usize, raw: i32 },
}

fn op_strategy() -> impl Strategy<Value = Op> {
    prop_oneof![
        (0..IDS.len(), 0..DeviceType::ALL.len()).prop_map(|(id, ty)| Op::Add { id, ty }),
        (0..IDS.len()).prop_map(|id| Op::Remove { id }),
        (0..IDS.len(), 0..8usize, any::<i32>()).prop_map(|(id, param, raw)| Op::Set { id, param, raw }),
    ]
}

fn value_for(ty: ParamType, raw: i32) -> Value {
    match ty {
        ParamType::Int => Value::Int(raw),
        ParamType::Float => Value::Float(raw as f32 / 7.0),
        ParamType::Bool => Value::Bool(raw & 1 == 1),
    }
}

type Model = HashMap<&'static str, (DeviceType, Vec<Value>)>;

fn check_model(client: &RegionHandle, model: &Model) -> Result<(), TestCaseError> {
    for (id, (ty, values)) in model {
        for (spec, expected) in ty.schema().iter().zip(values) {
            let got = client.get_value(id, spec.name);
            prop_assert_eq!(got.ok(), Some(*expected), "{}.{}", id, spec.name);
        }
    }
    for id in IDS.iter().filter(|id| !model.contains_key(*id)) {
        prop_assert!(matches!(client.device(id), Err(ShmError::DeviceNotFound { .. })), "matches! assertion failed");
    }
    let listed = client
        .list_devices()
        .filter(|d| d.status.is_present())
        .count();
    prop_assert_eq!(listed, model.len());
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn table_matches_model(ops in prop::collection::vec(op_strategy(), 1..40)) {
        let dir = TempDir::new().unwrap();
        let owner = RegionOwner::create_in(dir.path(), "model", CAPACITY).unwrap();
        let client = RegionHandle::attach_in(dir.path(), "model").unwrap();
        let mut model: Model = HashMap::new();

        for op in ops {
            match op {
                Op::Add { id, ty } => {
                    let ty = DeviceType::ALL[ty];
                    let result = owner.add_device(IDS[id], ty);
                    if model.contains_key(IDS[id]) {
                        prop_assert!(matches!(result, Err(ShmError::DuplicateDevice { .. })), "matches! assertion failed");
                    } else if model.len() == CAPACITY {
                        prop_assert!(matches!(result, Err(ShmError::CapacityExceeded { .. })), "matches! assertion failed");
                    } else {
                        prop_assert!(result.is_ok());
                        let defaults = ty.schema().iter().map(|s| s.default).collect();
                        model.insert(IDS[id], (ty, defaults));
                    }
                }
                Op::Remove { id } => {
                    let result = owner.remove_device(IDS[id]);
                    if model.remove(IDS[id]).is_some() {
                        prop_assert!(result.is_ok());
                    } else {
                        prop_assert!(matches!(result, Err(ShmError::DeviceNotFound { .. })), "matches! assertion failed");
                    }
                }
                Op::Set { id, param, raw } => {
                    let Some((ty, values)) = model.get_mut(IDS[id]) else {
                        prop_assert!(client.set_value(IDS[id], "speed", Value::Int(raw)).is_err());
                        continue;
                    };
                    let schema = ty.schema();
                    let index = param % schema.len();
                    let spec = &schema[index];
                    let value = value_for(spec.ty, raw);
                    let result = client.set_value(IDS[id], spec.name, value);
                    if spec.is_writable() {
                        prop_assert!(result.is_ok());
                        values[index] = value;
                    } else {
                        prop_assert!(matches!(result, Err(ShmError::ReadOnlyParameter { .. })), "matches! assertion failed");
                    }
                }
            }
            check_model(&client, &model)?;
        }
    }
}
