use std::collections::HashMap;
use tracing::debug;

/// Per-tool argument renames applied before a call is routed.
///
/// Remote callers sometimes use a different argument name than the tool
/// declares; `tool -> {remote name -> local name}` maps them back.
#[derive(Debug, Clone, Default)]
pub struct ParamAliasTable {
    tools: HashMap<String, HashMap<String, String>>,
}

impl ParamAliasTable {
    pub fn new(tools: HashMap<String, HashMap<String, String>>) -> Self {
        Self { tools }
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Rename aliased keys in `arguments`.
    ///
    /// A key is only renamed when the local name is not already present, so
    /// an explicit local argument always wins.
    pub fn apply(&self, tool: &str, arguments: &mut serde_json::Value) {
        let (Some(aliases), Some(args)) = (self.tools.get(tool), arguments.as_object_mut()) else {
            return;
        };
        for (remote, local) in aliases {
            if args.contains_key(local) {
                continue;
            }
            if let Some(value) = args.remove(remote) {
                debug!(tool = %tool, from = %remote, to = %local, "Renamed tool argument");
                args.insert(local.clone(), value);
            }
        }
    }
}
