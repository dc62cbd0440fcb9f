//! Requests a WASM module's `factory` makes of the host.
//!
//! A sandboxed module cannot call capability methods directly. Its factory
//! returns a list of `{ function, args }` requests instead, and the host
//! applies them to the module's capability surface in order.

use std::collections::BTreeMap;

use serde::Deserialize;
use serde_json::Value;

use crate::capabilities::Capabilities;
use crate::error::ExtensionError;
use crate::hooks::{Callback, DEFAULT_ACCEPTED_ARGS, DEFAULT_PRIORITY};
use crate::routes::RouteNode;
use crate::state::{ComponentRef, LanguageOption};

/// Maximum log message length from modules.
const MAX_LOG_MESSAGE_LEN: usize = 2048;

/// Strip control characters (except newline/tab) and cap the length.
pub(crate) fn sanitize_log_message(message: &str) -> String {
    let cleaned: String = message
        .chars()
        .filter(|c| !c.is_control() || *c == '\n' || *c == '\t')
        .take(MAX_LOG_MESSAGE_LEN)
        .collect();
    if message.chars().count() > MAX_LOG_MESSAGE_LEN {
        format!("{cleaned}… (truncated)")
    } else {
        cleaned
    }
}

/// One capability call requested by a module.
#[derive(Debug, Clone, Deserialize)]
pub struct HostRequest {
    pub function: String,
    #[serde(default)]
    pub args: Value,
}

/// What a module's `factory` export returns.
#[derive(Debug, Default, Deserialize)]
pub struct FactoryResponse {
    #[serde(default)]
    pub host_requests: Vec<HostRequest>,
}

#[derive(Debug, Deserialize)]
struct HookArgs {
    tag: String,
    export: String,
    #[serde(default = "default_priority")]
    priority: i32,
    #[serde(default = "default_accepted_args")]
    accepted_args: usize,
}

fn default_priority() -> i32 {
    DEFAULT_PRIORITY
}

fn default_accepted_args() -> usize {
    DEFAULT_ACCEPTED_ARGS
}

fn str_arg<'a>(args: &'a Value, key: &str) -> Result<&'a str, ExtensionError> {
    args[key]
        .as_str()
        .ok_or_else(|| ExtensionError::InvalidDescriptor(format!("missing string argument '{key}'")))
}

fn typed_arg<T: serde::de::DeserializeOwned>(args: &Value, key: &str) -> Result<T, ExtensionError> {
    Ok(serde_json::from_value(args[key].clone())?)
}

/// Apply `requests` to `caps` on behalf of `module`.
///
/// `export_callback` turns the name of one of the module's exports into a
/// hook callback; it returns `None` if the module has no such export.
/// Unknown functions and failing requests are logged and skipped, they never
/// fail the module. Returns the number of requests applied.
pub fn process_host_requests(
    module: &str,
    requests: Vec<HostRequest>,
    caps: &Capabilities,
    export_callback: &dyn Fn(&str) -> Option<Callback>,
) -> usize {
    let mut applied = 0;

    for req in requests {
        let args = &req.args;
        let result: Result<(), ExtensionError> = match req.function.as_str() {
            "add_filter" | "add_action" => {
                serde_json::from_value::<HookArgs>(args.clone())
                    .map_err(ExtensionError::from)
                    .and_then(|hook| {
                        let callback = export_callback(&hook.export).ok_or_else(|| {
                            ExtensionError::NotFound(format!("export '{}'", hook.export))
                        })?;
                        let handle = caps.hook(&hook.tag);
                        if req.function == "add_filter" {
                            handle.add_filter(callback, hook.priority, hook.accepted_args);
                        } else {
                            handle.add_action(callback, hook.priority, hook.accepted_args);
                        }
                        Ok(())
                    })
            }
            "add_layout" => str_arg(args, "name").and_then(|name| {
                let component = str_arg(args, "component")?;
                caps.add_layout(name, ComponentRef::new(component));
                Ok(())
            }),
            "add_widgets" => typed_arg::<BTreeMap<String, ComponentRef>>(args, "widgets")
                .map(|widgets| caps.add_widgets(widgets)),
            "add_template" => str_arg(args, "name").and_then(|name| {
                let component = str_arg(args, "component")?;
                caps.add_template(name, ComponentRef::new(component));
                Ok(())
            }),
            "remove_templates" => {
                typed_arg::<Vec<String>>(args, "names").map(|names| caps.remove_templates(&names))
            }
            "add_support_languages" => typed_arg::<Vec<LanguageOption>>(args, "languages")
                .map(|languages| caps.add_support_languages(languages)),
            "set_default_locale" => {
                str_arg(args, "locale").map(|locale| caps.set_default_locale(locale))
            }
            "set_locale" => str_arg(args, "locale").map(|locale| caps.set_locale(locale)),
            "add_routes" => typed_arg::<Vec<RouteNode>>(args, "routes")
                .and_then(|routes| caps.add_routes(routes, None)),
            "log_info" => {
                let msg = sanitize_log_message(args["message"].as_str().unwrap_or_default());
                tracing::info!(module = %module, "{msg}");
                Ok(())
            }
            "log_warn" => {
                let msg = sanitize_log_message(args["message"].as_str().unwrap_or_default());
                tracing::warn!(module = %module, "{msg}");
                Ok(())
            }
            "log_error" => {
                let msg = sanitize_log_message(args["message"].as_str().unwrap_or_default());
                tracing::error!(module = %module, "{msg}");
                Ok(())
            }
            other => {
                tracing::warn!(
                    module = %module,
                    function = %other,
                    "unknown host request, ignoring"
                );
                continue;
            }
        };

        match result {
            Ok(()) => applied += 1,
            Err(e) => tracing::error!(
                module = %module,
                function = %req.function,
                "host request failed: {e}"
            ),
        }
    }

    applied
}
