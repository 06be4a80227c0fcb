//! Derived summaries for well-known action payloads.
//!
//! * any `transfer`: `from`, `to`, `quantity` (or `value`) and `memo` move
//!   into the summary, with the quantity split into amount and symbol
//! * `eosio:newaccount`: new account name plus `owner`/`active` authorities
//! * `eosio:updateauth`: permission, parent and the authority with empty
//!   `accounts`/`keys`/`waits` lists pruned

use serde_json::{Map, Value};

use crate::types::ActionSummary;

/// Enrich `data` in place and return its summary, if the action is one of
/// the known shapes.
pub fn enrich(account: &str, name: &str, data: &mut Value) -> Option<ActionSummary> {
    let obj = data.as_object_mut()?;
    match (account, name) {
        (_, "transfer") => transfer(obj),
        ("eosio", "newaccount") => new_account(obj),
        ("eosio", "updateauth") => update_auth(obj),
        _ => None,
    }
}

fn as_text(v: Option<Value>) -> String {
    match v {
        Some(Value::String(s)) => s,
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

fn transfer(obj: &mut Map<String, Value>) -> Option<ActionSummary> {
    let key = ["quantity", "value"]
        .into_iter()
        .find(|k| obj.get(*k).and_then(Value::as_str).is_some())?;
    let (amount, symbol) = {
        let quantity = obj.get(key).and_then(Value::as_str)?;
        let (amount, symbol) = quantity.trim().split_once(' ')?;
        (amount.parse::<f64>().ok()?, symbol.trim().to_string())
    };

    obj.shift_remove(key);
    Some(ActionSummary::Transfer {
        from: as_text(obj.shift_remove("from")),
        to: as_text(obj.shift_remove("to")),
        amount,
        symbol,
        memo: as_text(obj.shift_remove("memo")),
    })
}

fn new_account(obj: &mut Map<String, Value>) -> Option<ActionSummary> {
    let newact = match obj.get("newact").and_then(Value::as_str) {
        Some(n) if !n.is_empty() => n.to_string(),
        _ => match obj.get("name").and_then(Value::as_str) {
            Some(n) if !n.is_empty() => {
                let n = n.to_string();
                obj.shift_remove("name");
                n
            }
            _ => return None,
        },
    };
    Some(ActionSummary::NewAccount {
        newact,
        owner: obj.get("owner").cloned().unwrap_or(Value::Null),
        active: obj.get("active").cloned().unwrap_or(Value::Null),
    })
}

fn update_auth(obj: &mut Map<String, Value>) -> Option<ActionSummary> {
    let auth = obj.get_mut("auth")?.as_object_mut()?;
    for list in ["accounts", "keys", "waits"] {
        if auth.get(list).and_then(Value::as_array).map_or(false, Vec::is_empty) {
            auth.shift_remove(list);
        }
    }
    let auth = Value::Object(auth.clone());
    Some(ActionSummary::UpdateAuth {
        permission: as_text(obj.get("permission").cloned()),
        parent: as_text(obj.get("parent").cloned()),
        auth,
    })
}
