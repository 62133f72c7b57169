extern crate failure;
extern crate sprec;
extern crate tracing;
extern crate tracing_subscriber;

use std::cmp::Ordering;
use std::env;

use tracing::info;

use sprec::batching::SessionParallelBatcher;
use sprec::config::Config;
use sprec::datasets::load_movielens_1m;
use sprec::models::ewma::Hyperparameters;
use sprec::models::SessionParallelModel;
use sprec::pipeline::SessionData;
use sprec::training::Trainer;

/// Usage: `train_movielens [DATA_DIR] [CONFIG_JSON]`.
fn main() -> Result<(), failure::Error> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::INFO.into()),
        )
        .init();

    let mut args = env::args().skip(1);
    let data_dir = args.next().unwrap_or_else(|| "ml-1m".to_owned());
    let config = match args.next() {
        Some(path) => Config::from_json_file(path)?,
        None => Config::default(),
    };

    let store = load_movielens_1m(&data_dir)?;
    let data = SessionData::prepare(&store, &config)?;

    let mut model = Hyperparameters::from_config(data.vocabulary().num_items(), &config).build();
    let trainer = Trainer::new(config.clone());

    let summaries = trainer.fit(&mut model, data.train())?;
    if let Some(last) = summaries.last() {
        info!(loss = last.loss, hit_rate = last.hit_rate, "Training done");
    }

    let evaluation = trainer.evaluate(&mut model, data.valid())?;
    info!(
        k = config.hit_rate_k,
        hit_rate = evaluation.hit_rate,
        "Validation"
    );

    // Show what the model expects next for the first validation lanes.
    model.reset();
    if let Some(block) = SessionParallelBatcher::new(data.valid(), &config)?.next() {
        model.advance(&block)?;

        for (scores, &input, &target) in model
            .lane_scores()?
            .iter()
            .zip(block.inputs())
            .zip(block.targets())
            .map(|((scores, input), target)| (scores, input, target))
            .take(3)
        {
            let mut ranked: Vec<_> = (1..scores.len()).collect();
            ranked.sort_by(|&a, &b| {
                scores[b]
                    .partial_cmp(&scores[a])
                    .unwrap_or(Ordering::Equal)
            });

            println!(
                "After {:?}, next was {:?}.",
                store.get_movie(input).unwrap_or("?"),
                store.get_movie(target).unwrap_or("?")
            );
            for &item_id in ranked.iter().take(config.hit_rate_k) {
                if let Ok(title) = store.get_movie(item_id) {
                    println!("    {}", title);
                }
            }
        }
    }

    Ok(())
}
