use crate::infra::{
    parse_datetime, InMemoryEscrowRepository, InMemoryEvictionRepository,
    InMemoryLeaseDirectory, LoggingNotifier, SandboxProcessor,
};
use chrono::{DateTime, Duration, Utc};
use clap::Args;
use estate_ops::error::AppError;
use estate_ops::money::Money;
use estate_ops::workflows::escrow::{
    EscrowService, EscrowSettings, FundJobRequest, JobId, MilestoneDraft, RefundMethod,
    ReleaseRequest,
};
use estate_ops::workflows::eviction::{
    EvictionNotice, EvictionService, ExpirySweepReport, LeaseId, NewEvictionNotice, NoticeStatus,
    NoticeType,
};
use std::sync::Arc;

type DemoEvictions =
    EvictionService<InMemoryLeaseDirectory, InMemoryEvictionRepository, LoggingNotifier>;
type DemoEscrows = EscrowService<InMemoryEscrowRepository, SandboxProcessor>;

#[derive(Args, Debug, Default)]
pub(crate) struct DemoArgs {
    /// Clock used for the walkthrough (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_datetime)]
    pub(crate) now: Option<DateTime<Utc>>,
    /// Skip the escrow portion of the demo.
    #[arg(long)]
    pub(crate) skip_escrow: bool,
}

#[derive(Args, Debug, Default)]
pub(crate) struct SweepArgs {
    /// Evaluate deadlines as of this instant (RFC 3339 or YYYY-MM-DD). Defaults to now.
    #[arg(long, value_parser = crate::infra::parse_datetime)]
    pub(crate) now: Option<DateTime<Utc>>,
}

fn demo_evictions() -> DemoEvictions {
    EvictionService::new(
        Arc::new(InMemoryLeaseDirectory::seeded()),
        Arc::new(InMemoryEvictionRepository::default()),
        Arc::new(LoggingNotifier),
    )
}

fn demo_escrows() -> DemoEscrows {
    EscrowService::new(
        Arc::new(InMemoryEscrowRepository::default()),
        Arc::new(SandboxProcessor::default()),
        EscrowSettings::default(),
    )
}

fn notice_request(lease: &str, notice_type: NoticeType, reason: &str) -> NewEvictionNotice {
    NewEvictionNotice {
        lease_id: LeaseId::from(lease),
        notice_type,
        reason: reason.to_string(),
        amount_owed: None,
        additional_notes: None,
    }
}

/// Serves the sample notices the sweep and demo operate on, relative to `now`.
pub(crate) fn seed_demo_notices(
    service: &DemoEvictions,
    now: DateTime<Utc>,
) -> Result<Vec<EvictionNotice>, AppError> {
    let mut overdue = notice_request("lease-maple-1a", NoticeType::ThreeDay, "Nonpayment of rent");
    overdue.amount_owed = Some(Money::from_cents(145_000));
    let overdue = service.create_notice(overdue, now - Duration::days(5))?;

    let curing = service.create_notice(
        notice_request(
            "lease-maple-2c",
            NoticeType::SevenDay,
            "Lease violation: unauthorized occupant",
        ),
        now - Duration::days(9),
    )?;
    let curing = service.update_status(
        &curing.id,
        NoticeStatus::CurePeriod,
        Some("Tenant acknowledged and asked for time to cure"),
        now - Duration::days(8),
    )?;

    let pending = service.create_notice(
        notice_request(
            "lease-maple-1a",
            NoticeType::ThirtyDay,
            "Owner move-in",
        ),
        now - Duration::days(2),
    )?;

    Ok(vec![overdue, curing, pending])
}

pub(crate) fn run_sweep(args: SweepArgs) -> Result<(), AppError> {
    let now = args.now.unwrap_or_else(Utc::now);
    let service = demo_evictions();
    let seeded = seed_demo_notices(&service, now)?;

    println!("Eviction expiry sweep as of {}", now.to_rfc3339());
    println!("- {} notices on file", seeded.len());
    let report = service.process_expired_notices(now)?;
    render_sweep(&report);

    for notice in &seeded {
        let current = service.get_notice(&notice.id)?;
        println!(
            "  {} {} deadline {} -> {}",
            current.id,
            current.notice_type.label(),
            current.deadline_date().format("%Y-%m-%d"),
            current.status
        );
    }
    Ok(())
}

fn render_sweep(report: &ExpirySweepReport) {
    println!(
        "- {} expired | {} failed",
        report.processed,
        report.failures.len()
    );
    for failure in &report.failures {
        println!("  ! {}: {}", failure.notice_id, failure.error);
    }
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let DemoArgs { now, skip_escrow } = args;
    let now = now.unwrap_or_else(Utc::now);

    println!("Estate operations demo ({})", now.format("%Y-%m-%d"));
    run_eviction_walkthrough(now)?;
    if !skip_escrow {
        run_escrow_walkthrough(now).await?;
    }
    Ok(())
}

fn run_eviction_walkthrough(now: DateTime<Utc>) -> Result<(), AppError> {
    let service = demo_evictions();
    let seeded = seed_demo_notices(&service, now)?;
    println!("\nEviction notices");
    for notice in &seeded {
        println!(
            "- {} on {} ({}) served {} | deadline {}",
            notice.notice_type.label(),
            notice.lease_id,
            notice.reason,
            notice.served_at.format("%Y-%m-%d"),
            notice.deadline_date().format("%Y-%m-%d")
        );
    }

    let curing = &seeded[1];
    service.update_status(
        &curing.id,
        NoticeStatus::FiledWithCourt,
        Some("Occupant still in unit; forcible entry and detainer petition filed"),
        now,
    )?;
    let completed = service.complete_eviction(&curing.id, now + Duration::days(21))?;
    println!(
        "- {} completed on {}",
        completed.id,
        completed
            .completed_at
            .map(|at| at.format("%Y-%m-%d").to_string())
            .unwrap_or_default()
    );
    if let Some(notes) = &completed.additional_notes {
        println!("  notes:");
        for line in notes.lines() {
            println!("    {line}");
        }
    }

    let report = service.process_expired_notices(now)?;
    println!("Expiry sweep");
    render_sweep(&report);

    let landlord = service.notices_for_landlord(&completed.landlord_id)?;
    println!("Landlord {} portfolio", completed.landlord_id);
    for notice in landlord {
        println!("- {} {}", notice.id, notice.status);
    }
    Ok(())
}

async fn run_escrow_walkthrough(now: DateTime<Utc>) -> Result<(), AppError> {
    let service = demo_escrows();
    let funded = service
        .fund_job(
            FundJobRequest {
                job_id: JobId::from("job-roof-replacement"),
                customer_processor_id: "cus_demo_owner".to_string(),
                payment_method_id: "pm_demo_card".to_string(),
                milestones: vec![
                    MilestoneDraft {
                        title: "Tear off and inspection".to_string(),
                        amount: Money::from_cents(50_000),
                    },
                    MilestoneDraft {
                        title: "Shingle install".to_string(),
                        amount: Money::from_cents(125_000),
                    },
                ],
            },
            now,
        )
        .await?;

    println!("\nEscrow {}", funded.escrow.id);
    println!(
        "- held {} {} on {}",
        funded.escrow.funded_amount,
        funded.escrow.currency,
        funded.escrow.payment_intent_id
    );

    let first = &funded.milestones[0];
    let release = service
        .release_milestone_payment(
            &ReleaseRequest {
                milestone_id: first.id.clone(),
                payment_intent_id: funded.escrow.payment_intent_id.clone(),
                contractor_account_id: "acct_demo_roofer".to_string(),
                customer_processor_id: funded.escrow.customer_id.clone(),
                payment_method_id: "pm_demo_card".to_string(),
            },
            now,
        )
        .await?;
    println!(
        "- released '{}': contractor {} | platform fee {} (transfer {})",
        first.title, release.contractor_amount, release.platform_fee, release.transfer_id
    );

    let summary = service.escrow_summary(&funded.escrow.id)?;
    println!(
        "- {} of {} released across {} milestone(s)",
        summary.released_total,
        summary.escrow.funded_amount,
        summary.releases.len()
    );

    let outcome = service.refund_escrow(&funded.escrow.id, now).await?;
    match outcome.method {
        RefundMethod::Refunded { refund_id, amount } => {
            println!("- unreleased balance {amount} refunded ({refund_id})")
        }
        RefundMethod::CancelledHold { payment_intent_id } => {
            println!("- hold {payment_intent_id} cancelled")
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn clock() -> DateTime<Utc> {
        parse_datetime("2024-01-10T12:00:00Z").expect("valid timestamp")
    }

    #[test]
    fn sweep_expires_only_overdue_demo_notices() {
        let service = demo_evictions();
        let seeded = seed_demo_notices(&service, clock()).expect("seeded");

        let report = service
            .process_expired_notices(clock())
            .expect("sweep runs");
        assert_eq!(report.processed, 2);

        let statuses: Vec<NoticeStatus> = seeded
            .iter()
            .map(|notice| service.get_notice(&notice.id).expect("stored").status)
            .collect();
        assert_eq!(
            statuses,
            vec![
                NoticeStatus::Expired,
                NoticeStatus::Expired,
                NoticeStatus::Served
            ]
        );
    }

    #[tokio::test]
    async fn sandbox_refund_after_first_payout_returns_the_rest() {
        let service = demo_escrows();
        let funded = service
            .fund_job(
                FundJobRequest {
                    job_id: JobId::from("job-porch"),
                    customer_processor_id: "cus_demo_owner".to_string(),
                    payment_method_id: "pm_demo_card".to_string(),
                    milestones: vec![
                        MilestoneDraft {
                            title: "Framing".to_string(),
                            amount: Money::from_cents(50_000),
                        },
                        MilestoneDraft {
                            title: "Decking".to_string(),
                            amount: Money::from_cents(125_000),
                        },
                    ],
                },
                clock(),
            )
            .await
            .expect("funded");
        service
            .release_milestone_payment(
                &ReleaseRequest {
                    milestone_id: funded.milestones[0].id.clone(),
                    payment_intent_id: funded.escrow.payment_intent_id.clone(),
                    contractor_account_id: "acct_demo_builder".to_string(),
                    customer_processor_id: funded.escrow.customer_id.clone(),
                    payment_method_id: "pm_demo_card".to_string(),
                },
                clock(),
            )
            .await
            .expect("released");

        let outcome = service
            .refund_escrow(&funded.escrow.id, clock())
            .await
            .expect("refunded");
        match outcome.method {
            RefundMethod::Refunded { amount, .. } => {
                assert_eq!(amount, Money::from_cents(125_000))
            }
            other => panic!("expected a refund, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn demo_runs_end_to_end() {
        run_demo(DemoArgs {
            now: Some(clock()),
            skip_escrow: false,
        })
        .await
        .expect("demo completes");
    }
}
