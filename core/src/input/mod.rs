//! Task list input: the hand-off point from a task producer.

mod id_gen;
mod parser;

pub use id_gen::generate_task_id;
pub use parser::{
    load_tasks_from_file, parse_json_tasks, parse_task_blocks, parse_tasks, validate_id,
};
