//! Grouped ("super") tools synthesized from flat dataset descriptors
//!
//! Every distinct dataset group becomes one tool named `<group>_data`. The
//! caller picks a `site` and a `task`; the pair selects the per-dataset
//! executor registered under `<site>_<task>`.

use anyhow::{Result, anyhow, bail};
use async_trait::async_trait;
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;
use tracing::debug;

use super::schema::{FieldSpec, ToolSchema};
use super::{DEFAULT_TOOL_COST, ToolHandler};

/// Flat description of one collectable dataset
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DatasetDescriptor {
    pub id: String,
    pub group: String,
    pub site: String,
    pub task_desc: String,
    pub inputs: Vec<String>,
    pub cost: u32,
}

impl DatasetDescriptor {
    pub fn new(
        id: impl Into<String>,
        group: impl Into<String>,
        site: impl Into<String>,
        task_desc: impl Into<String>,
        cost: u32,
    ) -> Self {
        Self {
            id: id.into(),
            group: group.into(),
            site: site.into(),
            task_desc: task_desc.into(),
            inputs: vec!["url".to_string()],
            cost,
        }
    }

    pub fn with_inputs<I, S>(mut self, inputs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.inputs = inputs.into_iter().map(Into::into).collect();
        self
    }

    /// Task name within its site: the id with the first `<site>_` removed
    pub fn task_suffix(&self) -> String {
        self.id.replacen(&format!("{}_", self.site), "", 1)
    }
}

/// Executor behind a single (site, task) pair
#[async_trait]
pub trait TaskExecutor: Send + Sync {
    async fn run(&self, input: Value) -> Result<String>;
}

/// Composite tool dispatching to per-(site, task) executors
pub struct GroupTool {
    name: String,
    description: String,
    schema: ToolSchema,
    cost: u32,
    tasks_by_site: Vec<(String, Vec<String>)>,
    executors: HashMap<String, Arc<dyn TaskExecutor>>,
}

impl GroupTool {
    /// Known task suffixes for a site
    pub fn tasks_for(&self, site: &str) -> Option<&[String]> {
        self.tasks_by_site
            .iter()
            .find(|(s, _)| s == site)
            .map(|(_, tasks)| tasks.as_slice())
    }

    pub fn sites(&self) -> impl Iterator<Item = &str> {
        self.tasks_by_site.iter().map(|(s, _)| s.as_str())
    }
}

#[async_trait]
impl ToolHandler for GroupTool {
    fn name(&self) -> &str {
        &self.name
    }

    fn description(&self) -> &str {
        &self.description
    }

    fn schema(&self) -> &ToolSchema {
        &self.schema
    }

    fn cost(&self) -> u32 {
        self.cost
    }

    async fn execute(&self, input: Value) -> Result<String> {
        let mut args = match input {
            Value::Object(map) => map,
            _ => bail!("Arguments for '{}' must be an object", self.name),
        };
        let site = take_string(&mut args, "site")?;
        let task = take_string(&mut args, "task")?;

        let Some(tasks) = self.tasks_for(&site) else {
            let sites: Vec<&str> = self.sites().collect();
            bail!(
                "Unknown site '{}'. Available sites are: [{}]",
                site,
                sites.join(", ")
            );
        };
        if !tasks.contains(&task) {
            bail!(
                "Invalid task '{}' for site '{}'. Available tasks are: [{}]",
                task,
                site,
                tasks.join(", ")
            );
        }

        let key = format!("{site}_{task}");
        let executor = self
            .executors
            .get(&key)
            .ok_or_else(|| anyhow!("Internal error: No executor found for '{}'", key))?;

        debug!("{} dispatching to {}", self.name, key);
        executor.run(Value::Object(args)).await
    }
}

fn take_string(args: &mut serde_json::Map<String, Value>, field: &str) -> Result<String> {
    match args.remove(field) {
        Some(Value::String(s)) => Ok(s),
        _ => Err(anyhow!("Missing '{}' parameter", field)),
    }
}

struct GroupDraft<'a> {
    name: String,
    sites: Vec<(String, Vec<&'a DatasetDescriptor>)>,
    inputs: Vec<String>,
}

/// Build one grouped tool per distinct group, in order of first appearance.
/// `make_executor` is called once per dataset.
pub fn synthesize<F>(datasets: &[DatasetDescriptor], mut make_executor: F) -> Vec<GroupTool>
where
    F: FnMut(&DatasetDescriptor) -> Arc<dyn TaskExecutor>,
{
    let mut drafts: Vec<GroupDraft<'_>> = Vec::new();

    for dataset in datasets {
        let index = match drafts.iter().position(|g| g.name == dataset.group) {
            Some(i) => i,
            None => {
                drafts.push(GroupDraft {
                    name: dataset.group.clone(),
                    sites: Vec::new(),
                    inputs: Vec::new(),
                });
                drafts.len() - 1
            }
        };
        let draft = &mut drafts[index];

        match draft.sites.iter_mut().find(|(s, _)| *s == dataset.site) {
            Some((_, members)) => members.push(dataset),
            None => draft.sites.push((dataset.site.clone(), vec![dataset])),
        }
        for input in &dataset.inputs {
            if !draft.inputs.contains(input) {
                draft.inputs.push(input.clone());
            }
        }
    }

    drafts
        .into_iter()
        .map(|draft| build_group(draft, &mut make_executor))
        .collect()
}

fn build_group<F>(draft: GroupDraft<'_>, make_executor: &mut F) -> GroupTool
where
    F: FnMut(&DatasetDescriptor) -> Arc<dyn TaskExecutor>,
{
    let mut description = format!(
        "Performs data scraping from {} sites.\n\nYou must specify the `site` and `task` to perform.\n",
        draft.name.replacen('_', " ", 1)
    );

    let mut tasks_by_site = Vec::with_capacity(draft.sites.len());
    let mut executors: HashMap<String, Arc<dyn TaskExecutor>> = HashMap::new();
    let mut cost = 0;

    for (site, members) in &draft.sites {
        let tasks: Vec<String> = members.iter().map(|d| d.task_suffix()).collect();
        description.push_str(&format!(
            "\nFor site '{}', available tasks are: [{}].",
            site,
            tasks.join(", ")
        ));
        for (dataset, task) in members.iter().zip(&tasks) {
            executors.insert(format!("{site}_{task}"), make_executor(*dataset));
            cost = cost.max(dataset.cost);
        }
        tasks_by_site.push((site.clone(), tasks));
    }

    let site_names: Vec<&str> = tasks_by_site.iter().map(|(s, _)| s.as_str()).collect();
    let mut schema = ToolSchema::new()
        .field(FieldSpec::string("site").one_of(site_names))
        .field(
            FieldSpec::string("task")
                .describe("The specific task to perform on the site. Varies by site."),
        );
    for input in &draft.inputs {
        let field = if input == "url" {
            FieldSpec::url(input.as_str())
        } else {
            FieldSpec::string(input.as_str())
        };
        schema = schema.field(field.optional());
    }

    GroupTool {
        name: format!("{}_data", draft.name),
        description,
        schema,
        cost: if cost == 0 { DEFAULT_TOOL_COST } else { cost },
        tasks_by_site,
        executors,
    }
}
