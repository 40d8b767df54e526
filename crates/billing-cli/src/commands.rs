//! Subcommand execution.
//!
//! Every command returns a JSON value; `main` prints it.

use std::str::FromStr;

use anyhow::Context;
use billing::{Clock, PaymentEngine, ReportService, SystemClock, TransactionRepository};
use chrono::Duration;
use ledger_store::User;
use rust_decimal::Decimal;
use serde_json::{Value, json};

use crate::cli::{Command, DepositArgs, PayArgs, ReportArgs, RentNoticesArgs, TransactionsArgs};
use crate::config::Config;
use crate::error::CliError;
use crate::seed;
use crate::store::OperatorStore;

/// Runs one subcommand against `store`.
pub async fn execute<S: OperatorStore>(
    store: &S,
    command: Command,
    config: &Config,
) -> anyhow::Result<Value> {
    match command {
        Command::Migrate => {
            let migrated = store.migrate().await.context("migration failed")?;
            if !migrated {
                tracing::info!("in-memory store has no schema to migrate");
            }
            Ok(json!({ "migrated": migrated }))
        }
        Command::Seed => Ok(serde_json::to_value(seed::seed(store).await?)?),
        Command::Deposit(args) => deposit(store, args).await,
        Command::Pay(args) => pay(store, args).await,
        Command::Transactions(args) => transactions(store, args).await,
        Command::Report(args) => report(store, args).await,
        Command::RentNotices(args) => rent_notices(store, args, config).await,
    }
}

async fn user_by_email<S: OperatorStore>(store: &S, email: &str) -> anyhow::Result<User> {
    store
        .find_user_by_email(email)
        .await?
        .ok_or_else(|| CliError::UnknownEmail(email.to_string()).into())
}

async fn deposit<S: OperatorStore>(store: &S, args: DepositArgs) -> anyhow::Result<Value> {
    let amount =
        Decimal::from_str(args.amount.trim()).map_err(|_| CliError::InvalidAmount(args.amount))?;
    let user = user_by_email(store, &args.email).await?;

    let engine = PaymentEngine::new(store.clone());
    let transaction = engine
        .deposit(user.id, amount)
        .await
        .with_context(|| format!("deposit for {} failed", user.email))?;
    let balance = engine.balance(user.id).await?;

    Ok(json!({
        "email": user.email,
        "transaction": transaction,
        "balance": balance,
    }))
}

async fn pay<S: OperatorStore>(store: &S, args: PayArgs) -> anyhow::Result<Value> {
    let user = user_by_email(store, &args.email).await?;

    let engine = PaymentEngine::new(store.clone());
    let purchase = engine
        .pay(user.id, &args.course_code)
        .await
        .with_context(|| format!("payment of {} for {} failed", args.course_code, user.email))?;
    let balance = engine.balance(user.id).await?;

    Ok(json!({
        "email": user.email,
        "purchase": purchase,
        "balance": balance,
    }))
}

async fn transactions<S: OperatorStore>(
    store: &S,
    args: TransactionsArgs,
) -> anyhow::Result<Value> {
    let user = user_by_email(store, &args.email).await?;

    let rows = TransactionRepository::new(store.clone())
        .find_by_filters(
            user.id,
            args.kind,
            args.course_code.as_deref(),
            args.skip_expired,
            SystemClock.now(),
        )
        .await?;

    Ok(serde_json::to_value(rows)?)
}

async fn report<S: OperatorStore>(store: &S, args: ReportArgs) -> anyhow::Result<Value> {
    let reports = ReportService::new(store.clone());
    let report = match args.month {
        Some(date) => reports.statements_for_month(date).await?,
        None => reports.monthly_statements().await?,
    };
    Ok(serde_json::to_value(report)?)
}

async fn rent_notices<S: OperatorStore>(
    store: &S,
    args: RentNoticesArgs,
    config: &Config,
) -> anyhow::Result<Value> {
    let within = args
        .hours
        .map_or_else(|| config.rent_notice_window(), Duration::hours);

    let notices = ReportService::new(store.clone())
        .rent_ending_notices(within)
        .await?;
    Ok(serde_json::to_value(notices)?)
}
