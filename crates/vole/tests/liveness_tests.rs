// Liveness tests — randomized jobs checked against an independent oracle
// and against the interpreter's actual end-of-run environment.

use std::collections::{HashMap, HashSet};

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use vole::prelude::*;
use vole_job::OpTypeConf;

/// Generate a random well-formed job: a few seeded inputs, a chain of
/// unary/binary user ops consuming random live names, and a random subset
/// of names declared as graph outputs.
fn random_job(rng: &mut StdRng) -> Job {
    let num_inputs = rng.gen_range(1..=3);
    let num_ops = rng.gen_range(1..=12);

    let mut builder = Job::builder("random");
    let mut names: Vec<String> = Vec::new();
    for i in 0..num_inputs {
        builder = builder.input(format!("in{}", i));
        names.push(format!("in{}/out", i));
    }
    for i in 0..num_ops {
        let op_name = format!("op{}", i);
        let arity = rng.gen_range(1..=2);
        let kind = if arity == 1 { "relu" } else { "add" };
        let mut picked = Vec::new();
        for _ in 0..arity {
            picked.push(names[rng.gen_range(0..names.len())].clone());
        }
        builder = builder.user_op(&op_name, kind, vec![("x".to_string(), picked)]);
        names.push(format!("{}/out_0", op_name));
    }
    // Pick 1..=3 distinct names as graph outputs.
    let num_outputs = rng.gen_range(1..=3);
    let mut chosen = HashSet::new();
    for j in 0..num_outputs {
        let name = names[rng.gen_range(0..names.len())].clone();
        if chosen.insert(name.clone()) {
            builder = builder.output(&format!("ret{}", j), &name);
        }
    }
    builder.build()
}

/// Independent oracle: forward scan computing each name's last consuming
/// operator index, excluding names any output op reads.
fn expected_deaths(job: &Job) -> HashMap<String, usize> {
    let mut pinned: HashSet<&str> = HashSet::new();
    let mut last_use: HashMap<String, usize> = HashMap::new();
    for (i, op) in job.net.iter().enumerate() {
        match &op.conf {
            OpTypeConf::User(conf) => {
                for (_, names) in &conf.inputs {
                    for name in names {
                        last_use.insert(name.clone(), i);
                    }
                }
            }
            OpTypeConf::Identity(conf) => {
                last_use.insert(conf.input.clone(), i);
            }
            OpTypeConf::Output(conf) => {
                pinned.insert(&conf.input);
            }
            _ => {}
        }
    }
    last_use.retain(|name, _| !pinned.contains(name.as_str()));
    last_use
}

#[test]
fn test_liveness_matches_oracle_on_random_jobs() {
    for seed in 0..50u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let job = random_job(&mut rng);
        let liveness = compute_liveness(&job);
        let expected = expected_deaths(&job);

        // Every name dies exactly where the oracle says, and nowhere else.
        let mut actual: HashMap<String, usize> = HashMap::new();
        for (i, names) in liveness.iter().enumerate() {
            for name in names {
                let previous = actual.insert(name.clone(), i);
                assert!(previous.is_none(), "seed {}: '{}' marked dead twice", seed, name);
            }
        }
        assert_eq!(actual, expected, "seed {}", seed);
    }
}

#[test]
fn test_no_name_dies_before_its_last_reader() {
    for seed in 50..80u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let job = random_job(&mut rng);
        let liveness = compute_liveness(&job);
        for (i, names) in liveness.iter().enumerate() {
            for name in names {
                for (j, later) in job.net.iter().enumerate().skip(i + 1) {
                    if let OpTypeConf::User(conf) = &later.conf {
                        let reads = conf
                            .inputs
                            .iter()
                            .any(|(_, ns)| ns.iter().any(|n| n == name));
                        assert!(
                            !reads,
                            "seed {}: '{}' dies at {} but op {} still reads it",
                            seed, name, i, j
                        );
                    }
                }
            }
        }
    }
}

/// Run the generated jobs for real and check the environment afterwards:
/// exactly the pinned-or-never-consumed names survive, everything else
/// was evicted exactly once (a double evict or a missed name would have
/// failed the run).
#[test]
fn test_executed_runs_leave_exactly_the_live_names() {
    for seed in 0..25u64 {
        let mut rng = StdRng::seed_from_u64(seed);
        let job = random_job(&mut rng);
        let num_inputs = job.input_ops.len();

        let produced: HashSet<String> = job
            .input_ops
            .iter()
            .map(|n| format!("{}/out", n))
            .chain(job.net.iter().filter_map(|op| match &op.conf {
                OpTypeConf::User(_) => Some(format!("{}/out_0", op.name)),
                _ => None,
            }))
            .collect();
        let dying: HashSet<String> = expected_deaths(&job).into_keys().collect();
        let expected_live: HashSet<String> =
            produced.difference(&dying).cloned().collect();

        let session = Session::<CpuBackend>::new(job).unwrap();
        let dev = CpuDevice::new(0);
        let inputs: Vec<Value<CpuBackend>> = (0..num_inputs)
            .map(|i| {
                Value::Local(
                    CpuTensor::full(4usize, i as f64 + 1.0, DType::F64, &dev).unwrap(),
                )
            })
            .collect();
        let result = session.run(&inputs, &HashMap::new()).unwrap();

        let live: HashSet<String> = result.env.names().map(str::to_string).collect();
        assert_eq!(live, expected_live, "seed {}", seed);
    }
}
