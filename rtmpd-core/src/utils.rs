use chrono::Local;
use uuid::Uuid;

pub fn current_time() -> u32 {
    let dt = Local::now();
    dt.timestamp() as u32
}

pub fn gen_uid() -> String {
    Uuid::new_v4().simple().to_string()
}
