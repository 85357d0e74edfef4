use std::fmt::Write as _;

use grim_ai::{AiError, Completion, CompletionRequest, LlmClient};

/// One storyteller prompt exercised against every benchmarked provider.
#[derive(Debug, Clone)]
pub struct Scenario {
    pub name: &'static str,
    pub system_prompt: &'static str,
    pub user_prompt: &'static str,
}

const STORYTELLER_SYSTEM: &str = "You are the storyteller for a social deduction game \
of hidden roles set in a small town plagued by a demon. Narrate with atmosphere and \
brevity. Never reveal any player's hidden role unless the rules require it.";

/// The fixed prompt set: narration, rule adjudication, vote guidance, and a
/// structured-output check.
pub fn default_scenarios() -> Vec<Scenario> {
    vec![
        Scenario {
            name: "opening_night",
            system_prompt: STORYTELLER_SYSTEM,
            user_prompt: "Seven players have taken their seats and the first night begins. \
Narrate the opening of the first night in at most three sentences.",
        },
        Scenario {
            name: "rule_adjudication",
            system_prompt: STORYTELLER_SYSTEM,
            user_prompt: "It is night 2. The demon attacks the washerwoman. The monk chose \
to protect the washerwoman tonight, but the poisoner poisoned the monk. Does the \
washerwoman die? Explain the interaction in two sentences.",
        },
        Scenario {
            name: "vote_guidance",
            system_prompt: STORYTELLER_SYSTEM,
            user_prompt: "Day 2: a player has been nominated for execution with 5 of 7 \
players alive. Explain to the table how many votes are required and what happens on a \
tie, in plain language.",
        },
        Scenario {
            name: "structured_command",
            system_prompt: STORYTELLER_SYSTEM,
            user_prompt: "Reply with only a JSON object, no prose, describing your next \
storyteller action. Keys: \"action\" (string), \"target\" (string or null), \
\"public_message\" (string).",
        },
    ]
}

/// One scenario attempt against one provider.
#[derive(Debug)]
pub struct Trial {
    pub scenario: &'static str,
    pub outcome: Result<Completion, AiError>,
}

/// Aggregated benchmark run for one provider/model pair.
#[derive(Debug)]
pub struct ProviderBench {
    pub provider: String,
    pub model: String,
    pub trials: Vec<Trial>,
}

impl ProviderBench {
    pub fn success_count(&self) -> usize {
        self.trials
            .iter()
            .filter(|trial| trial.outcome.is_ok())
            .count()
    }

    /// Mean round-trip latency across successful trials, or `None` when
    /// every trial failed.
    pub fn mean_latency_ms(&self) -> Option<u64> {
        let latencies: Vec<u64> = self
            .trials
            .iter()
            .filter_map(|trial| trial.outcome.as_ref().ok())
            .map(|completion| completion.latency_ms)
            .collect();
        if latencies.is_empty() {
            return None;
        }
        Some(latencies.iter().sum::<u64>() / latencies.len() as u64)
    }

    /// Mean response length in characters across successful trials.
    pub fn mean_response_chars(&self) -> Option<usize> {
        let lengths: Vec<usize> = self
            .trials
            .iter()
            .filter_map(|trial| trial.outcome.as_ref().ok())
            .map(|completion| completion.text.chars().count())
            .collect();
        if lengths.is_empty() {
            return None;
        }
        Some(lengths.iter().sum::<usize>() / lengths.len())
    }
}

/// Runs every scenario against one provider sequentially. Failures are
/// recorded per trial; one bad scenario never aborts the run.
pub async fn run_provider_bench(
    provider: &str,
    model: &str,
    client: &dyn LlmClient,
    scenarios: &[Scenario],
) -> ProviderBench {
    let mut trials = Vec::with_capacity(scenarios.len());
    for scenario in scenarios {
        let request = CompletionRequest {
            model: model.to_string(),
            system_prompt: scenario.system_prompt.to_string(),
            user_prompt: scenario.user_prompt.to_string(),
            max_tokens: Some(512),
            temperature: Some(0.7),
        };
        tracing::info!(provider, scenario = scenario.name, "running scenario");
        let outcome = client.complete(&request).await;
        match &outcome {
            Ok(completion) => tracing::info!(
                provider,
                scenario = scenario.name,
                latency_ms = completion.latency_ms,
                chars = completion.text.chars().count(),
                "scenario succeeded"
            ),
            Err(error) => tracing::warn!(
                provider,
                scenario = scenario.name,
                %error,
                "scenario failed"
            ),
        }
        trials.push(Trial {
            scenario: scenario.name,
            outcome,
        });
    }
    ProviderBench {
        provider: provider.to_string(),
        model: model.to_string(),
        trials,
    }
}

/// Serializable summary of a benchmark run, for the results file.
pub fn bench_summary(benches: &[ProviderBench]) -> serde_json::Value {
    let entries: Vec<serde_json::Value> = benches
        .iter()
        .map(|bench| {
            let trials: Vec<serde_json::Value> = bench
                .trials
                .iter()
                .map(|trial| match &trial.outcome {
                    Ok(completion) => serde_json::json!({
                        "scenario": trial.scenario,
                        "success": true,
                        "latency_ms": completion.latency_ms,
                        "chars": completion.text.chars().count(),
                        "total_tokens": completion.usage.total_tokens,
                    }),
                    Err(error) => serde_json::json!({
                        "scenario": trial.scenario,
                        "success": false,
                        "error": error.to_string(),
                    }),
                })
                .collect();
            serde_json::json!({
                "provider": bench.provider,
                "model": bench.model,
                "success_count": bench.success_count(),
                "trial_count": bench.trials.len(),
                "mean_latency_ms": bench.mean_latency_ms(),
                "mean_response_chars": bench.mean_response_chars(),
                "trials": trials,
            })
        })
        .collect();
    serde_json::json!({ "benches": entries })
}

/// Persists the benchmark summary as pretty JSON.
pub fn save_bench(path: &std::path::Path, benches: &[ProviderBench]) -> anyhow::Result<()> {
    use anyhow::Context;

    let rendered = serde_json::to_string_pretty(&bench_summary(benches))
        .context("failed to serialize benchmark summary")?;
    grim_core::write_text_atomic(path, &rendered)
        .with_context(|| format!("failed to write benchmark summary {}", path.display()))
}

/// Side-by-side summary of benchmarked providers with per-trial detail.
pub fn render_bench(benches: &[ProviderBench]) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", "=".repeat(70));
    let _ = writeln!(out, "  Narrator Benchmark");
    let _ = writeln!(out, "{}", "=".repeat(70));
    for bench in benches {
        let _ = writeln!(
            out,
            "\n{} ({}): {}/{} scenarios ok",
            bench.provider.to_uppercase(),
            bench.model,
            bench.success_count(),
            bench.trials.len()
        );
        if let Some(latency) = bench.mean_latency_ms() {
            let _ = writeln!(out, "  mean latency: {latency}ms");
        }
        if let Some(chars) = bench.mean_response_chars() {
            let _ = writeln!(out, "  mean response length: {chars} chars");
        }
        for trial in &bench.trials {
            match &trial.outcome {
                Ok(completion) => {
                    let _ = writeln!(
                        out,
                        "  [ok]   {:<20} {:>6}ms  {} tokens",
                        trial.scenario, completion.latency_ms, completion.usage.total_tokens
                    );
                }
                Err(error) => {
                    let _ = writeln!(out, "  [fail] {:<20} {error}", trial.scenario);
                }
            }
        }
    }
    for bench in benches {
        for trial in &bench.trials {
            if let Ok(completion) = &trial.outcome {
                let _ = writeln!(
                    out,
                    "\n--- {} / {} ---\n{}",
                    bench.provider, trial.scenario, completion.text
                );
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use grim_ai::{AiError, Completion, CompletionRequest, LlmClient, TokenUsage};

    use super::{bench_summary, default_scenarios, render_bench, run_provider_bench};

    /// Succeeds for every scenario except the ones listed by name.
    struct StubClient {
        failing: Vec<&'static str>,
    }

    #[async_trait]
    impl LlmClient for StubClient {
        async fn complete(&self, request: &CompletionRequest) -> Result<Completion, AiError> {
            if self
                .failing
                .iter()
                .any(|needle| request.user_prompt.contains(needle))
            {
                return Err(AiError::Status {
                    status: 503,
                    body: "overloaded".to_string(),
                });
            }
            Ok(Completion {
                text: "The town holds its breath.".to_string(),
                latency_ms: 120,
                usage: TokenUsage {
                    input_tokens: 40,
                    output_tokens: 8,
                    total_tokens: 48,
                },
            })
        }
    }

    #[test]
    fn unit_default_scenarios_cover_the_fixed_prompt_set() {
        let scenarios = default_scenarios();
        let names: Vec<_> = scenarios.iter().map(|scenario| scenario.name).collect();
        assert_eq!(
            names,
            vec![
                "opening_night",
                "rule_adjudication",
                "vote_guidance",
                "structured_command"
            ]
        );
        for scenario in &scenarios {
            assert!(!scenario.system_prompt.is_empty());
            assert!(!scenario.user_prompt.is_empty());
        }
    }

    #[tokio::test]
    async fn functional_bench_aggregates_and_tolerates_per_trial_failures() {
        let client = StubClient {
            // Matches the rule adjudication prompt only.
            failing: vec!["poisoner poisoned the monk"],
        };
        let bench =
            run_provider_bench("gemini", "gemini-3-flash-preview", &client, &default_scenarios())
                .await;
        assert_eq!(bench.trials.len(), 4);
        assert_eq!(bench.success_count(), 3);
        assert_eq!(bench.mean_latency_ms(), Some(120));
        assert_eq!(bench.mean_response_chars(), Some(26));

        let summary = bench_summary(&[bench]);
        let entry = &summary["benches"][0];
        assert_eq!(entry["provider"], "gemini");
        assert_eq!(entry["success_count"], 3);
        assert_eq!(entry["trials"][1]["success"], false);
        assert!(entry["trials"][1]["error"]
            .as_str()
            .expect("error string")
            .contains("503"));
    }

    #[tokio::test]
    async fn functional_all_failures_yield_no_means_but_render_cleanly() {
        let client = StubClient {
            failing: vec![
                "first night",
                "poisoner",
                "nominated",
                "JSON object",
            ],
        };
        let bench = run_provider_bench("deepseek", "deepseek-chat", &client, &default_scenarios())
            .await;
        assert_eq!(bench.success_count(), 0);
        assert_eq!(bench.mean_latency_ms(), None);
        assert_eq!(bench.mean_response_chars(), None);
        let rendered = render_bench(&[bench]);
        assert!(rendered.contains("DEEPSEEK (deepseek-chat): 0/4 scenarios ok"));
        assert!(rendered.contains("[fail]"));
    }
}
