use clap::Args;
use trialflow::error::AppError;
use trialflow::workflows::trials::{calculated_penalty, PenaltyPolicy};

#[derive(Args, Debug)]
pub(crate) struct PenaltyPreviewArgs {
    /// Hours of notice before the scheduled lesson (negative for after the start)
    #[arg(long)]
    notice_hours: Option<f64>,
    /// Sentiment score of the cancellation reason, between 0 and 1
    #[arg(long)]
    sentiment: Option<f64>,
    /// Penalty cap, as configured via TRIAL_MAX_PENALTY in the service
    #[arg(long, default_value_t = 5.0)]
    max_penalty: f64,
}

/// Prints the penalty a cancellation would draw, or the whole curve when no
/// specific point is requested. Admin support tooling for override reviews.
pub(crate) fn run_penalty_preview(args: PenaltyPreviewArgs) -> Result<(), AppError> {
    let policy = PenaltyPolicy {
        max_penalty: args.max_penalty,
    };

    if let (Some(notice), Some(sentiment)) = (args.notice_hours, args.sentiment) {
        let penalty = calculated_penalty(&policy, notice, sentiment);
        println!(
            "notice {notice:.1}h, sentiment {sentiment:.2} -> penalty {penalty:.2} (cap {:.2})",
            policy.max_penalty
        );
        return Ok(());
    }

    let notice_points = [-1.0, 2.0, 12.0, 48.0, 96.0];
    let sentiments = args.sentiment.map(|s| vec![s]).unwrap_or_else(|| {
        vec![0.1, 0.5, 0.9]
    });
    let notices = args
        .notice_hours
        .map(|n| vec![n])
        .unwrap_or_else(|| notice_points.to_vec());

    println!("penalty curve (cap {:.2})", policy.max_penalty);
    for notice in notices {
        for sentiment in &sentiments {
            let penalty = calculated_penalty(&policy, notice, *sentiment);
            println!("  notice {notice:>6.1}h  sentiment {sentiment:.2}  penalty {penalty:.2}");
        }
    }
    Ok(())
}
