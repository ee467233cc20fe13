use harvester_core::{SchedulerError, SchedulerResult, StringSet};

/// 一批测站及其在每小时内的触发分钟
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    pub minute: u32,
    pub codes: Vec<String>,
}

impl Batch {
    /// 每小时在 `minute` 分触发的五段式CRON表达式
    pub fn cron(&self) -> String {
        format!("{} * * * *", self.minute)
    }
}

/// 将测站代码按字典序分成若干批, 并在一小时内均匀分布
///
/// 第 `n` 批在第 `ceil(n * 59 / 批次数)` 分钟触发. 批次数不超过59时所有分钟都在 `[0, 58]` 内.
pub fn plan_batches(codes: &StringSet, batch_size: usize) -> SchedulerResult<Vec<Batch>> {
    if batch_size == 0 {
        return Err(SchedulerError::Schedule("批次大小必须大于0".to_string()));
    }
    let sorted = codes.sorted();
    let num_batches = sorted.len().div_ceil(batch_size);
    if num_batches == 0 {
        return Ok(Vec::new());
    }
    Ok(sorted
        .chunks(batch_size)
        .enumerate()
        .map(|(n, chunk)| Batch {
            minute: (n * 59).div_ceil(num_batches) as u32,
            codes: chunk.to_vec(),
        })
        .collect())
}
