use async_trait::async_trait;
use depcuter::*;
use std::sync::Arc;
use std::time::Duration;

// 示例任务实现
struct StageTask {
    name: String,
    millis: u64,
}

#[async_trait]
impl Task<String> for StageTask {
    async fn execute(&self) -> Result<String, DepcuterError> {
        tracing::info!(stage = %self.name, "running stage");

        // 模拟任务执行时间
        tokio::time::sleep(Duration::from_millis(self.millis)).await;

        if self.name == "notify" {
            return Err(DepcuterError::TaskExecution("mail server unreachable".to_string()));
        }
        Ok(format!("{} done", self.name))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::INFO)
        .with_target(true)
        .init();

    let engine = DefaultExecutionEngine::new(EngineConfig::default());
    let provider = |id: &String| -> BoxTask<String> {
        Arc::new(StageTask {
            name: id.clone(),
            millis: 100,
        })
    };
    let mut executor = DependentTasksExecutor::new(engine, provider);

    executor.add_dependency("extract".to_string(), "clean".to_string());
    executor.add_dependency("extract".to_string(), "enrich".to_string());
    executor.add_dependency("clean".to_string(), "load".to_string());
    executor.add_dependency("enrich".to_string(), "load".to_string());
    executor.add_dependency("load".to_string(), "notify".to_string());
    executor.add_dependency("notify".to_string(), "archive".to_string());
    executor.add_as_dependency_to_all_initial_nodes("provision".to_string());
    executor.add_independent("metrics".to_string());

    println!("=== 任务依赖图 ===");
    let mut out = Vec::new();
    executor.print(&mut out)?;
    println!("{}", String::from_utf8_lossy(&out));

    println!("=== 开始执行任务 ===");
    let start = std::time::Instant::now();
    let config = ExecutionConfig::NON_TERMINATING.scheduled_retrying(2, Duration::from_millis(200));
    let report = executor.execute(&config).await?;

    println!("=== 执行完成 ===");
    println!("执行时间: {:?}", start.elapsed());
    for (i, id) in report.processed.iter().enumerate() {
        let node = executor.graph().get(id).ok_or("missing node")?;
        println!("{}. {} {:?} {:?}", i + 1, id, node.status(), node.result());
    }
    println!("失败: {:?}, 跳过: {:?}", report.errored, report.skipped);

    Ok(())
}
