//! Subcommand implementations. Each command is one unit of work.

use carstore_core::{Car, CarDbContext, CarId, CarQuery, ContextOptions, RepoError};
use clap::Args;
use log::info;
use serde_json::Value;

#[derive(Debug, Args)]
pub struct AddArgs {
    /// JSON object, e.g. '{"make":"Saab","year":1987}'
    pub attributes: String,
}

#[derive(Debug, Args)]
pub struct IdArgs {
    pub id: CarId,
}

#[derive(Debug, Args)]
pub struct UpdateArgs {
    pub id: CarId,
    /// JSON object that replaces all attributes
    pub attributes: String,
}

#[derive(Debug, Args)]
pub struct ListArgs {
    /// Attribute filter `key=value`; the value is parsed as JSON when possible
    #[arg(long = "where", value_name = "KEY=VALUE")]
    pub filters: Vec<String>,

    #[arg(long)]
    pub limit: Option<u32>,

    #[arg(long, default_value_t = 0)]
    pub offset: u32,
}

type CommandResult = Result<(), Box<dyn std::error::Error>>;

pub fn add(options: ContextOptions, args: AddArgs) -> CommandResult {
    let car = Car::from_json_object(serde_json::from_str(&args.attributes)?)
        .ok_or("attributes must be a JSON object")?;

    let mut ctx = CarDbContext::new(options)?;
    let id = ctx.cars().add(car)?;
    ctx.save_changes()?;
    info!("event=cli_add module=cli status=ok id={}", id);
    println!("{id}");
    Ok(())
}

pub fn get(options: ContextOptions, args: IdArgs) -> CommandResult {
    let mut ctx = CarDbContext::new(options)?;
    let car = ctx
        .cars()
        .find(args.id)?
        .ok_or(RepoError::NotFound(args.id))?;
    println!("{}", serde_json::to_string_pretty(&car)?);
    Ok(())
}

pub fn list(options: ContextOptions, args: ListArgs) -> CommandResult {
    let mut query = CarQuery::new().offset(args.offset);
    if let Some(limit) = args.limit {
        query = query.limit(limit);
    }
    for filter in &args.filters {
        let (key, raw_value) = filter
            .split_once('=')
            .ok_or_else(|| format!("filter `{filter}` is not key=value"))?;
        query = query.where_eq(key.trim(), parse_filter_value(raw_value.trim()));
    }

    let mut ctx = CarDbContext::new(options)?;
    for car in ctx.cars().query(&query)? {
        println!("{}", serde_json::to_string(&car)?);
    }
    Ok(())
}

pub fn update(options: ContextOptions, args: UpdateArgs) -> CommandResult {
    let Value::Object(attributes) = serde_json::from_str::<Value>(&args.attributes)? else {
        return Err("attributes must be a JSON object".into());
    };

    let mut ctx = CarDbContext::new(options)?;
    let mut car = ctx
        .cars()
        .find(args.id)?
        .ok_or(RepoError::NotFound(args.id))?;
    car.attributes = attributes;
    ctx.cars().update(car)?;
    ctx.save_changes()?;
    info!("event=cli_update module=cli status=ok id={}", args.id);
    Ok(())
}

pub fn remove(options: ContextOptions, args: IdArgs) -> CommandResult {
    let mut ctx = CarDbContext::new(options)?;
    ctx.cars().remove(args.id)?;
    ctx.save_changes()?;
    info!("event=cli_remove module=cli status=ok id={}", args.id);
    Ok(())
}

pub fn count(options: ContextOptions) -> CommandResult {
    let mut ctx = CarDbContext::new(options)?;
    println!("{}", ctx.cars().count()?);
    Ok(())
}

/// Bare words that are not valid JSON are matched as strings.
fn parse_filter_value(raw: &str) -> Value {
    serde_json::from_str(raw).unwrap_or_else(|_| Value::String(raw.to_string()))
}
