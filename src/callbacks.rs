//! Pre/post-step hooks. Registered once per `Engine` instance; registering
//! the same step twice for the same list is rejected so a caller never
//! silently ends up with a hook running twice.

use crate::error::{Error, Result};
use crate::step::Step;
use std::collections::HashMap;

pub type Callback = Box<dyn Fn(&str, Step) -> Result<()> + Send + Sync>;

#[derive(Default)]
pub struct CallbackRegistry {
    pre: HashMap<Step, Callback>,
    post: HashMap<Step, Callback>,
}

impl CallbackRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register_pre(&mut self, step: Step, cb: Callback) -> Result<()> {
        if self.pre.contains_key(&step) {
            return Err(Error::CallbackRegistration(step));
        }
        self.pre.insert(step, cb);
        Ok(())
    }

    pub fn register_post(&mut self, step: Step, cb: Callback) -> Result<()> {
        if self.post.contains_key(&step) {
            return Err(Error::CallbackRegistration(step));
        }
        self.post.insert(step, cb);
        Ok(())
    }

    pub fn run_pre(&self, part_name: &str, step: Step) -> Result<()> {
        if let Some(cb) = self.pre.get(&step) {
            cb(part_name, step)?;
        }
        Ok(())
    }

    pub fn run_post(&self, part_name: &str, step: Step) -> Result<()> {
        if let Some(cb) = self.post.get(&step) {
            cb(part_name, step)?;
        }
        Ok(())
    }

    pub fn clear(&mut self) {
        self.pre.clear();
        self.post.clear();
    }
}
