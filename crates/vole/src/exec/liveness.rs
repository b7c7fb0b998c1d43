use std::collections::HashSet;

use vole_job::{Job, OpTypeConf, TICK_INPUT_NAME};

// Liveness — which names die after which operator
//
// A single backward pass over the net: the first time a name is seen
// (scanning back-to-front) is its last use, so it can be released once
// that operator finishes. Names read by a declared graph output are
// seeded as already-seen and therefore never marked dead.
//
// Pure function of the net's structure: identical inputs give identical
// tables. The declared operator order is trusted to be topological.

/// For each operator index, the environment names whose last use is that
/// operator (release candidates once it completes).
pub fn compute_liveness(job: &Job) -> Vec<Vec<String>> {
    let mut dying: Vec<Vec<String>> = vec![Vec::new(); job.net.len()];
    let mut seen: HashSet<String> = HashSet::new();
    for (i, op) in job.net.iter().enumerate().rev() {
        match &op.conf {
            // Graph outputs survive the whole run.
            OpTypeConf::Output(conf) => {
                seen.insert(conf.input.clone());
            }
            OpTypeConf::User(conf) => {
                for (ibn, names) in &conf.inputs {
                    if ibn == TICK_INPUT_NAME {
                        continue;
                    }
                    for name in names {
                        if seen.insert(name.clone()) {
                            dying[i].push(name.clone());
                        }
                    }
                }
            }
            OpTypeConf::Identity(conf) => {
                if seen.insert(conf.input.clone()) {
                    dying[i].push(conf.input.clone());
                }
            }
            OpTypeConf::LearningRateSchedule(_) | OpTypeConf::Other(_) => {}
        }
    }
    dying
}

#[cfg(test)]
mod tests {
    use super::*;
    use vole_job::Job;

    fn in_binding(names: &[&str]) -> Vec<(String, Vec<String>)> {
        vec![(
            "x".to_string(),
            names.iter().map(|s| s.to_string()).collect(),
        )]
    }

    #[test]
    fn test_last_use_marks_death() {
        // a is used by op0 and op1; b only by op0. b dies at 0, a at 1.
        let job = Job::builder("t")
            .input("a")
            .input("b")
            .user_op("op0", "add", in_binding(&["a/out", "b/out"]))
            .user_op("op1", "relu", in_binding(&["a/out"]))
            .output("out0", "op1/out_0")
            .build();
        let liveness = compute_liveness(&job);
        assert_eq!(liveness[0], vec!["b/out"]);
        assert_eq!(liveness[1], vec!["a/out"]);
        assert!(liveness[2].is_empty());
    }

    #[test]
    fn test_output_names_never_die() {
        let job = Job::builder("t")
            .input("a")
            .user_op("op0", "relu", in_binding(&["a/out"]))
            .user_op("op1", "relu", in_binding(&["op0/out_0"]))
            .output("out0", "op0/out_0")
            .build();
        let liveness = compute_liveness(&job);
        // op0/out_0 feeds both op1 and the graph output: never marked.
        assert!(liveness.iter().all(|names| !names.contains(&"op0/out_0".to_string())));
        assert_eq!(liveness[0], vec!["a/out"]);
    }

    #[test]
    fn test_identity_counts_as_use() {
        let job = Job::builder("t")
            .input("a")
            .user_op("op0", "relu", in_binding(&["a/out"]))
            .identity("alias0", "op0/out_0")
            .output("out0", "alias0/out")
            .build();
        let liveness = compute_liveness(&job);
        // The identity at index 1 is the last use of op0/out_0.
        assert_eq!(liveness[1], vec!["op0/out_0"]);
    }

    #[test]
    fn test_deterministic_across_calls() {
        let job = Job::builder("t")
            .input("a")
            .input("b")
            .user_op("op0", "mul", in_binding(&["a/out", "b/out"]))
            .user_op("op1", "add", in_binding(&["op0/out_0", "a/out"]))
            .output("out0", "op1/out_0")
            .build();
        assert_eq!(compute_liveness(&job), compute_liveness(&job));
    }
}
