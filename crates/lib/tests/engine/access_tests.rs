use chainplan_lib::access::{compute_accesses, template_inputs};
use serde_json::json;

#[test]
fn single_setting() {
  let result = compute_accesses("<%= settings.woot %>");
  assert_eq!(result.accesses, vec!["settings.woot"]);
  assert!(!result.unable_to_compute);
}

#[test]
fn unknown_helper_keeps_earlier_accesses() {
  let result = compute_accesses("<%= contracts.hello %><%= unknownHelper(settings.woot) %>");
  assert!(result.accesses.contains(&"contracts.hello".to_string()));
  assert!(result.unable_to_compute);
}

#[test]
fn only_first_level_is_recorded() {
  let result = compute_accesses("<%= contracts.Token.address %> / <%= imports.core.contracts.Vault.address %>");
  assert_eq!(result.accesses, vec!["contracts.Token", "imports.core"]);
}

#[test]
fn config_inputs_skip_depends() {
  let config = json!({
    "args": ["<%= settings.owner %>", 5, {"nested": "<%= txns.mint.hash %>"}],
    "depends": ["<%= settings.ignored %>"],
  });
  let result = template_inputs(&config);
  assert_eq!(result.accesses, vec!["settings.owner", "txns.mint"]);
  assert!(!result.unable_to_compute);
}
