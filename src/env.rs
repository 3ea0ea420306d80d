use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::vm::Value;


// Abstract over various memory management strategies.
pub type Node<T> = Rc<T>;


// The global name table. One flat scope, owned by a VM instance and
// shared with its executor for as long as both live. Bindings survive
// across individual executions.
pub struct Env {
    scope: RefCell<HashMap<String, Value>>
}


impl Env {
    pub fn new() -> Env {
        Env {scope: RefCell::new(HashMap::new())}
    }

    // Look up a name, cloning the value out of the table.
    pub fn get(&self, key: &str) -> Option<Value> {
        self.scope.borrow().get(key).cloned()
    }

    // Insert or overwrite a binding.
    pub fn define(&self, key: &str, value: Value) {
        self.scope.borrow_mut().insert(key.to_string(), value);
    }

    // Import a batch of bindings into the table.
    pub fn import(&self, bindings: Vec<(String, Value)>) {
        for (k, v) in bindings {
            self.define(&k, v)
        }
    }
}
