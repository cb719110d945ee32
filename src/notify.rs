use crate::calendar::format_date;
use crate::models::Prediction;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notification {
    pub title: String,
    pub body: String,
}

/// Predicted period date and fertile window, in that order.
pub fn notifications_for(prediction: &Prediction) -> [Notification; 2] {
    [
        Notification {
            title: "Period forecast".into(),
            body: format!(
                "Next period expected around {}.",
                format_date(prediction.predicted_next_period)
            ),
        },
        Notification {
            title: "Fertile window".into(),
            body: format!(
                "Fertile window: {} to {}.",
                format_date(prediction.ovulation_start),
                format_date(prediction.ovulation_end)
            ),
        },
    ]
}

/// Sink for reminders. No acknowledgement flows back.
pub trait Notifier: Send + Sync {
    fn notify(&self, notification: &Notification);
}

/// Writes reminders to the log; used when no platform notifier is wired in.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, notification: &Notification) {
        tracing::info!(title = %notification.title, body = %notification.body, "notification");
    }
}

/// Hand both reminders for `prediction` to `notifier`.
pub fn schedule(notifier: &dyn Notifier, prediction: &Prediction) {
    for notification in notifications_for(prediction).iter() {
        notifier.notify(notification);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::calendar::parse_date;
    use std::sync::Mutex;

    fn prediction() -> Prediction {
        Prediction {
            cycle_length: 28,
            cycle_day: 1,
            predicted_next_period: parse_date("2024-01-29").unwrap(),
            ovulation_date: parse_date("2024-01-15").unwrap(),
            ovulation_start: parse_date("2024-01-13").unwrap(),
            ovulation_end: parse_date("2024-01-17").unwrap(),
        }
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Notification>>);

    impl Notifier for Collect {
        fn notify(&self, notification: &Notification) {
            self.0.lock().unwrap().push(notification.clone());
        }
    }

    #[test]
    fn two_messages_with_dates() {
        let collect = Collect::default();
        schedule(&collect, &prediction());
        let sent = collect.0.lock().unwrap();
        assert_eq!(sent.len(), 2);
        assert!(sent[0].body.contains("2024-01-29"));
        assert!(sent[1].body.contains("2024-01-13"));
        assert!(sent[1].body.contains("2024-01-17"));
    }
}
