use serde::Serialize;
use std::collections::HashMap;
use tera::{Context, Error as TeraError, Tera};

use crate::models::tool::Tool;

const SYSTEM_TEMPLATE: &str = include_str!("prompts/system.md");

pub fn load_prompt<T: Serialize>(template: &str, context_data: &T) -> Result<String, TeraError> {
    let mut tera = Tera::default();
    tera.add_raw_template("inline_template", template)?;
    let context = Context::from_serialize(context_data)?;
    let rendered = tera.render("inline_template", &context)?;
    Ok(rendered)
}

/// Render the default system prompt describing the advertised tools
pub fn system_prompt(tools: &[Tool]) -> Result<String, TeraError> {
    let mut context = HashMap::new();
    context.insert("tools", tools);
    load_prompt(SYSTEM_TEMPLATE, &context)
}
