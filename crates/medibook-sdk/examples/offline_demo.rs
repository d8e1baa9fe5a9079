use medibook_sdk::{
    AppointmentInput, MedibookConfig, MedibookSDK, NetworkStatus, OwnerType, Result,
};
use tracing::info;

#[tokio::main]
async fn main() -> Result<()> {
    // 初始化日志
    tracing_subscriber::fmt::init();

    println!("🚀 Medibook SDK 离线优先演示");
    println!("==============================\n");

    // 1. 配置并初始化 SDK
    let config = MedibookConfig::builder()
        .data_dir("./medibook_demo_data")
        .api_base_url("http://localhost:3000")
        .debug_mode(true)
        .build();
    let sdk = MedibookSDK::initialize(config).await?;
    info!(
        "SDK 已初始化 (版本 {}, 存储可用: {})",
        MedibookSDK::version(),
        sdk.is_storage_supported()
    );

    // 2. 模拟断网，离线创建一条预约
    sdk.network().set_status(NetworkStatus::Offline);
    let appointment = sdk
        .save_appointment(AppointmentInput {
            title: "年度体检".to_string(),
            doctor_id: "doc_42".to_string(),
            patient_id: "pat_7".to_string(),
            date: "2026-09-15".to_string(),
            time: Some("09:30".to_string()),
            notes: Some("空腹前往".to_string()),
        })
        .await?;
    println!(
        "📦 离线预约已入队: id={} synced={}",
        appointment.id, appointment.synced
    );

    // 3. 离线读取：本地缓存与待同步记录合并返回
    let appointments = sdk.list_appointments("pat_7", OwnerType::Patient).await;
    println!("📋 当前可见预约 {} 条", appointments.len());
    for item in &appointments {
        println!("   - {} ({}, synced={})", item.title, item.date, item.synced);
    }

    // 4. 恢复在线：重连任务自动排空待同步队列
    //    （本演示没有真实服务端，排空会失败并保留队列，下次重试）
    sdk.network().set_status(NetworkStatus::Online);
    let report = sdk.drain_pending().await;
    println!(
        "🔄 排空报告: 尝试 {} / 送达 {} / 剩余 {}",
        report.attempted, report.delivered, report.remaining
    );

    // 5. 本地资料与设置
    sdk.set_setting("reminder_lead_minutes", "30").await?;
    println!(
        "⚙️ 提醒提前量: {:?} 分钟",
        sdk.get_setting("reminder_lead_minutes").await?
    );

    sdk.shutdown().await?;
    println!("\n✅ 演示结束");
    Ok(())
}
