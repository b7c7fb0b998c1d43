// Interpreter tests — end-to-end execution of local jobs

use std::collections::HashMap;

use vole::prelude::*;
use vole_job::{
    AttrValue, LearningRateDecayConf, LearningRateScheduleConf, OperatorConf, OpTypeConf,
    OutputConf, UserOpConf, TICK_INPUT_NAME,
};

fn dev() -> CpuDevice {
    CpuDevice::new(0)
}

fn local_full(shape: impl Into<Shape>, val: f64) -> Value<CpuBackend> {
    Value::Local(CpuTensor::full(shape, val, DType::F32, &dev()).unwrap())
}

fn binding(name: &str, tensors: &[&str]) -> (String, Vec<String>) {
    (
        name.to_string(),
        tensors.iter().map(|s| s.to_string()).collect(),
    )
}

fn no_vars() -> HashMap<String, Value<CpuBackend>> {
    HashMap::new()
}

// End-to-end local scenario

#[test]
fn test_add_two_constants_end_to_end() {
    let job = Job::builder("two_plus_three")
        .input("a")
        .input("b")
        .user_op("add0", "add", vec![binding("x", &["a/out", "b/out"])])
        .output("out0", "add0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();

    let inputs = vec![local_full((2usize, 2usize), 2.0), local_full((2usize, 2usize), 3.0)];
    let result = session.run(&inputs, &no_vars()).unwrap();

    assert_eq!(result.outputs.len(), 1);
    let out = result.outputs[0].as_local().unwrap();
    assert_eq!(out.dims(), &[2, 2]);
    assert_eq!(out.to_f64_vec().unwrap(), vec![5.0; 4]);

    // a/out and b/out die at the add; only the graph output survives.
    assert!(!result.env.contains("a/out"));
    assert!(!result.env.contains("b/out"));
    assert!(result.env.contains("add0/out_0"));
    assert_eq!(result.env.len(), 1);
}

#[test]
fn test_run_twice_reuses_cached_op_exprs() {
    let job = Job::builder("t")
        .input("a")
        .input("b")
        .user_op("mul0", "mul", vec![binding("x", &["a/out", "b/out"])])
        .output("out0", "mul0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    for _ in 0..2 {
        let inputs = vec![local_full(4usize, 3.0), local_full(4usize, 4.0)];
        let result = session.run(&inputs, &no_vars()).unwrap();
        let out = result.outputs[0].as_local().unwrap();
        assert_eq!(out.to_f64_vec().unwrap(), vec![12.0; 4]);
    }
}

#[test]
fn test_variables_seed_the_environment() {
    let job = Job::builder("t")
        .input("x")
        .variable("w")
        .user_op("mul0", "mul", vec![binding("a", &["x/out", "w/out"])])
        .output("out0", "mul0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();

    let mut variables = HashMap::new();
    variables.insert("w".to_string(), local_full(3usize, 10.0));
    let inputs = vec![local_full(3usize, 1.5)];
    let result = session.run(&inputs, &variables).unwrap();
    let out = result.outputs[0].as_local().unwrap();
    assert_eq!(out.to_f64_vec().unwrap(), vec![15.0; 3]);
}

// Identity op — alias transparency

#[test]
fn test_identity_aliases_without_copy() {
    let job = Job::builder("t")
        .input("a")
        .identity("alias0", "a/out")
        .output("out0", "alias0/out")
        .output("out1", "a/out")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();

    let a = CpuTensor::full((2usize, 3usize), 7.0, DType::F32, &dev()).unwrap();
    let result = session
        .run(&[Value::Local(a.clone())], &no_vars())
        .unwrap();

    let aliased = result.outputs[0].as_local().unwrap();
    // Same handle, not a copy: ids match and storage is shared.
    assert_eq!(aliased.id(), a.id());
    assert!(aliased.shares_storage(&a));
    assert_eq!(aliased.to_f64_vec().unwrap(), a.to_f64_vec().unwrap());
}

// View path — zero-copy reshape / expand_dims

fn reshape_op(name: &str, input: &str, shape: &[i64]) -> OperatorConf {
    let mut attrs = std::collections::BTreeMap::new();
    attrs.insert("shape".to_string(), AttrValue::Shape(shape.to_vec()));
    OperatorConf {
        name: name.to_string(),
        device_tag: "cpu:0".to_string(),
        conf: OpTypeConf::User(UserOpConf {
            op_type_name: "reshape".to_string(),
            attrs,
            inputs: vec![binding("in", &[input])],
            outputs: vec![("out".to_string(), vec![format!("{}/out_0", name)])],
        }),
    }
}

#[test]
fn test_reshape_is_zero_copy_and_write_through() {
    let job = Job::builder("t")
        .input("a")
        .op(reshape_op("view0", "a/out", &[6]))
        .output("out0", "view0/out_0")
        .output("out1", "a/out")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();

    let a = CpuTensor::from_f64_slice(&[1.0, 2.0, 3.0, 4.0, 5.0, 6.0], (2, 3), DType::F64, &dev())
        .unwrap();
    let result = session.run(&[Value::Local(a.clone())], &no_vars()).unwrap();
    let viewed = result.outputs[0].as_local().unwrap();

    assert_eq!(viewed.dims(), &[6]);
    assert!(viewed.shares_storage(&a));

    // Mutating the input is observable through the view.
    a.update_data_inplace(&[9.0, 9.0, 9.0, 9.0, 9.0, 9.0]).unwrap();
    assert_eq!(viewed.to_f64_vec().unwrap(), vec![9.0; 6]);
}

#[test]
fn test_reshape_element_count_mismatch_fails() {
    let job = Job::builder("t")
        .input("a")
        .op(reshape_op("view0", "a/out", &[4]))
        .output("out0", "view0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let err = session
        .run(&[local_full((2usize, 3usize), 1.0)], &no_vars())
        .unwrap_err();
    // Localized to the reshape op, not swallowed.
    assert!(err.to_string().contains("view0"));
}

#[test]
fn test_expand_dims_via_view_path() {
    let mut attrs = std::collections::BTreeMap::new();
    attrs.insert("axis".to_string(), AttrValue::Int(0));
    let op = OperatorConf {
        name: "ed0".to_string(),
        device_tag: "cpu:0".to_string(),
        conf: OpTypeConf::User(UserOpConf {
            op_type_name: "expand_dims".to_string(),
            attrs,
            inputs: vec![binding("in", &["a/out"])],
            outputs: vec![("out".to_string(), vec!["ed0/out_0".to_string()])],
        }),
    };
    let job = Job::builder("t")
        .input("a")
        .op(op)
        .output("out0", "ed0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let a = CpuTensor::full((2usize, 3usize), 1.0, DType::F32, &dev()).unwrap();
    let result = session.run(&[Value::Local(a.clone())], &no_vars()).unwrap();
    let out = result.outputs[0].as_local().unwrap();
    assert_eq!(out.dims(), &[1, 2, 3]);
    assert!(out.shares_storage(&a));
}

// Learning-rate schedule

#[test]
fn test_constant_learning_rate() {
    let job = Job::builder("t")
        .learning_rate("lr0", 0.125)
        .output("out0", "lr0/out")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let result = session.run(&[], &no_vars()).unwrap();
    let lr = result.outputs[0].as_local().unwrap();
    assert_eq!(lr.dims(), &[1]);
    assert_eq!(lr.to_scalar_f64().unwrap(), 0.125);
}

#[test]
fn test_learning_rate_decay_rejected() {
    let op = OperatorConf {
        name: "lr0".to_string(),
        device_tag: "cpu:0".to_string(),
        conf: OpTypeConf::LearningRateSchedule(LearningRateScheduleConf {
            learning_rate: 0.1,
            out: "out".to_string(),
            decay: Some(LearningRateDecayConf {
                policy: "cosine".to_string(),
                params: Default::default(),
            }),
        }),
    };
    let job = Job::builder("t").op(op).output("out0", "lr0/out").build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let err = session.run(&[], &no_vars()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    assert!(err.to_string().contains("cosine"));
}

// Unknown / skipped / malformed kinds

#[test]
fn test_unknown_op_kind_is_config_error() {
    let job = Job::builder("t")
        .input("a")
        .user_op("bogus0", "no_such_kind", vec![binding("x", &["a/out"])])
        .output("out0", "bogus0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let err = session.run(&[local_full(1usize, 1.0)], &no_vars()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
}

#[test]
fn test_unrecognized_kinds_are_skipped() {
    let other = OperatorConf {
        name: "dist0".to_string(),
        device_tag: "cpu:0".to_string(),
        conf: OpTypeConf::Other("wait_and_send_ids".to_string()),
    };
    let job = Job::builder("t")
        .input("a")
        .op(other)
        .output("out0", "a/out")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let result = session.run(&[local_full(2usize, 4.0)], &no_vars()).unwrap();
    assert_eq!(result.outputs.len(), 1);
}

#[test]
fn test_unresolved_name_is_config_error_with_op_context() {
    let job = Job::builder("t")
        .input("a")
        .user_op("add0", "add", vec![binding("x", &["a/out", "ghost/out"])])
        .output("out0", "add0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let err = session.run(&[local_full(1usize, 1.0)], &no_vars()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Config);
    let msg = err.to_string();
    assert!(msg.contains("add0"));
    assert!(msg.contains("ghost/out"));
}

#[test]
fn test_kernel_error_propagates_as_kernel_kind() {
    let job = Job::builder("t")
        .input("a")
        .input("b")
        .user_op("mm0", "matmul", vec![binding("x", &["a/out", "b/out"])])
        .output("out0", "mm0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    // Inner dimensions do not match: 2x3 @ 2x3.
    let inputs = vec![local_full((2usize, 3usize), 1.0), local_full((2usize, 3usize), 1.0)];
    let err = session.run(&inputs, &no_vars()).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Kernel);
}

// Input-side device cast

#[test]
fn test_inputs_cast_to_declared_device() {
    let op = OperatorConf {
        name: "add0".to_string(),
        device_tag: "cpu:1".to_string(),
        conf: OpTypeConf::User(UserOpConf {
            op_type_name: "add".to_string(),
            attrs: Default::default(),
            inputs: vec![binding("x", &["a/out", "b/out"])],
            outputs: vec![("out".to_string(), vec!["add0/out_0".to_string()])],
        }),
    };
    let job = Job::builder("t")
        .input("a")
        .input("b")
        .op(op)
        .output("out0", "add0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    // Both inputs live on cpu:0; the op executes on cpu:1.
    let inputs = vec![local_full(2usize, 1.0), local_full(2usize, 2.0)];
    let result = session.run(&inputs, &no_vars()).unwrap();
    let out = result.outputs[0].as_local().unwrap();
    assert_eq!(out.device(), &CpuDevice::new(1));
    assert_eq!(out.to_f64_vec().unwrap(), vec![3.0, 3.0]);
}

// Outputs in declaration order

#[test]
fn test_outputs_in_declaration_order() {
    let job = Job::builder("t")
        .input("a")
        .input("b")
        .user_op("add0", "add", vec![binding("x", &["a/out", "b/out"])])
        .output("first", "add0/out_0")
        .output("second", "a/out")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let inputs = vec![local_full(1usize, 1.0), local_full(1usize, 2.0)];
    let result = session.run(&inputs, &no_vars()).unwrap();
    assert_eq!(result.outputs.len(), 2);
    assert_eq!(result.outputs[0].as_local().unwrap().to_scalar_f64().unwrap(), 3.0);
    assert_eq!(result.outputs[1].as_local().unwrap().to_scalar_f64().unwrap(), 1.0);
}

// Tick input is ignored

#[test]
fn test_tick_input_carries_no_data() {
    let job = Job::builder("t")
        .input("a")
        .user_op(
            "relu0",
            "relu",
            vec![
                (TICK_INPUT_NAME.to_string(), vec!["tick/out".to_string()]),
                binding("in", &["a/out"]),
            ],
        )
        .output("out0", "relu0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    // "tick/out" is never produced; execution must not try to resolve it.
    let result = session.run(&[local_full(3usize, -1.0)], &no_vars()).unwrap();
    let out = result.outputs[0].as_local().unwrap();
    assert_eq!(out.to_f64_vec().unwrap(), vec![0.0; 3]);
}

// Output op kind in the middle of a net

#[test]
fn test_output_conf_reads_current_binding() {
    let out_mid = OperatorConf {
        name: "mid".to_string(),
        device_tag: "cpu:0".to_string(),
        conf: OpTypeConf::Output(OutputConf {
            input: "a/out".to_string(),
        }),
    };
    let job = Job::builder("t")
        .input("a")
        .op(out_mid)
        .user_op("neg0", "neg", vec![binding("x", &["a/out"])])
        .output("final", "neg0/out_0")
        .build();
    let session = Session::<CpuBackend>::new(job).unwrap();
    let result = session.run(&[local_full(1usize, 5.0)], &no_vars()).unwrap();
    assert_eq!(result.outputs[0].as_local().unwrap().to_scalar_f64().unwrap(), 5.0);
    assert_eq!(result.outputs[1].as_local().unwrap().to_scalar_f64().unwrap(), -5.0);
}
