//! Workbench CLI
//!
//! Every command prints one pretty JSON reply on stdout.

use clap::{Parser, Subcommand};
use polars::prelude::*;
use serde_json::Value;
use std::path::{Path, PathBuf};

use crate::automl::AutoMlParams;
use crate::config::WorkbenchConfig;
use crate::persistence::JsonModelStore;
use crate::registry::{available_models, DEFAULT_STACKING_BASE};
use crate::reply::Reply;
use crate::session::Session;
use crate::stacking::StackingParams;
use crate::trainer::TrainParams;

#[derive(Parser)]
#[command(name = "workbench")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Train, compare and stack regression models over CSV tables")]
#[command(long_about = None)]
pub struct Cli {
    /// JSON configuration file
    #[arg(long, global = true, env = "WORKBENCH_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Train a single model
    Train {
        /// Training table (CSV)
        #[arg(short, long)]
        data: PathBuf,

        /// Target column; repeat for several targets
        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// Model type (LinearRegression, RandomForest, GradientBoosting, XGBoost, SVR, MLP)
        #[arg(short, long, default_value = "RandomForest")]
        model: String,

        /// Grid-search the default space instead of fitting directly
        #[arg(long)]
        grid_search: bool,

        /// Validation fraction
        #[arg(long)]
        test_size: Option<f64>,

        /// Write the trained record to the models directory
        #[arg(long)]
        save: bool,
    },

    /// Run an AutoML competition across model families
    Automl {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// Held-out table scored with every family's winner
        #[arg(long)]
        test_data: Option<PathBuf>,

        /// fast or thorough
        #[arg(long, default_value = "fast")]
        mode: String,

        /// grid or random
        #[arg(long, default_value = "grid")]
        search: String,

        #[arg(long, default_value = "5")]
        cv_folds: usize,

        /// Families to try; all when omitted
        #[arg(long = "models", value_delimiter = ',')]
        models: Vec<String>,

        #[arg(long)]
        save: bool,
    },

    /// Train a stacking ensemble
    Stack {
        #[arg(short, long)]
        data: PathBuf,

        #[arg(short, long = "target", required = true)]
        targets: Vec<String>,

        /// Base learner keys (rf, gbr, lr, xgb, svr, mlp)
        #[arg(long = "base", value_delimiter = ',')]
        base: Vec<String>,

        /// Meta learner (LinearRegression, RandomForest, GradientBoosting)
        #[arg(long, default_value = "LinearRegression")]
        meta: String,

        #[arg(long, default_value = "5")]
        cv_folds: usize,

        #[arg(long)]
        save: bool,
    },

    /// Score a table with a saved model
    Predict {
        /// Saved model file
        #[arg(short, long)]
        model: PathBuf,

        #[arg(short, long)]
        data: PathBuf,

        /// Merge the input columns into every prediction row
        #[arg(long)]
        include_features: bool,

        /// Report metrics against the table's target columns instead
        #[arg(long)]
        evaluate: bool,
    },

    /// List the model registry
    Models,
}

pub fn load_config(path: Option<&Path>) -> anyhow::Result<WorkbenchConfig> {
    let config = match path {
        Some(path) => WorkbenchConfig::from_file(path)?,
        None => WorkbenchConfig::from_env()?,
    };
    Ok(config)
}

pub fn load_data(path: &Path) -> anyhow::Result<DataFrame> {
    let ext = path.extension().and_then(|e| e.to_str()).unwrap_or("");
    if ext != "csv" {
        anyhow::bail!("Unsupported file format: {}", ext);
    }
    let df = CsvReadOptions::default()
        .with_infer_schema_length(Some(1000))
        .with_has_header(true)
        .try_into_reader_with_file_path(Some(path.to_path_buf()))?
        .finish()?;
    Ok(df)
}

/// Save the current model when asked and note the path in the reply
fn maybe_save(session: &Session, mut reply: Reply, save: bool) -> Reply {
    if !save || !reply.success {
        return reply;
    }
    let store = JsonModelStore::new(session.config().models_dir.clone());
    match session.save_model(None, &store) {
        Ok(path) => {
            reply
                .payload
                .insert("saved_to".to_string(), Value::String(path.display().to_string()));
            reply
        }
        Err(e) => Reply::failure(&e),
    }
}

pub fn run(cli: Cli) -> anyhow::Result<Reply> {
    let config = load_config(cli.config.as_deref())?;
    let mut session = Session::new(config);

    let reply = match cli.command {
        Commands::Train {
            data,
            targets,
            model,
            grid_search,
            test_size,
            save,
        } => {
            let df = load_data(&data)?;
            let params = TrainParams {
                model_type: model,
                target_columns: targets,
                test_size,
                use_grid_search: grid_search,
                ..Default::default()
            };
            let reply = Reply::from_result(session.train_model(&df, &params), "Model trained successfully");
            maybe_save(&session, reply, save)
        }
        Commands::Automl {
            data,
            targets,
            test_data,
            mode,
            search,
            cv_folds,
            models,
            save,
        } => {
            let df = load_data(&data)?;
            let test_df = test_data.as_deref().map(load_data).transpose()?;
            let params = AutoMlParams {
                target_columns: targets,
                search_method: search,
                cv_folds,
                training_mode: mode,
                models: if models.is_empty() { None } else { Some(models) },
                ..Default::default()
            };
            let reply = Reply::from_result(
                session.run_automl(&df, test_df.as_ref(), &params),
                "AutoML training completed",
            );
            maybe_save(&session, reply, save)
        }
        Commands::Stack {
            data,
            targets,
            base,
            meta,
            cv_folds,
            save,
        } => {
            let df = load_data(&data)?;
            let base_models = if base.is_empty() {
                DEFAULT_STACKING_BASE.iter().map(|k| k.to_string()).collect()
            } else {
                base
            };
            let params = StackingParams {
                target_columns: targets,
                base_models,
                meta_model: meta,
                cv_folds,
                ..Default::default()
            };
            let reply = Reply::from_result(session.train_stacking(&df, &params), "Stacking ensemble trained");
            maybe_save(&session, reply, save)
        }
        Commands::Predict {
            model,
            data,
            include_features,
            evaluate,
        } => {
            let store = JsonModelStore::new(model.parent().map(Path::to_path_buf).unwrap_or_default());
            let df = load_data(&data)?;
            match session.load_model(&model, &store) {
                Ok(_) if evaluate => Reply::from_result(session.evaluate(None, &df), "Model evaluated"),
                Ok(_) => Reply::from_result(
                    session.predict(None, &df, include_features),
                    "Predictions made successfully",
                ),
                Err(e) => Reply::failure(&e),
            }
        }
        Commands::Models => Reply::ok("Available models", &available_models()),
    };
    Ok(reply)
}
