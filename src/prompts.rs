/// Fixed analytics questions, keyed by task category.
pub const ANALYTICS_PROMPTS: &[(&str, &str)] = &[
    (
        "yppSprint",
        "Summarize my channel performance in the last 48 hours. Focus on Views, Subscribers gained, and Average View Duration (AWD). List the top 5 performing videos by views.",
    ),
    (
        "channelOverview",
        "Summarize my channel performance in the last 28 days. Focus on core growth metrics (Views, Watch Time, Subscribers) and identify any significant trends.",
    ),
    (
        "videoPerformance",
        "Analyze the performance of my videos from the **Last 7 Days**. **CRITICAL: What is the First Hour Velocity (views in first 60 mins) of my latest short?** Also, what is the Average Views Per Viewer (APV) for my last 5 shorts? Which specific topics had the highest retention?",
    ),
    (
        "audience",
        "Who is my audience? **CRITICAL: List the TOP 3 PEAK HOURS (in local time) when my viewers are most active on YouTube.** Also, analyze the **Retention Curve**: At what specific second does retention typically drop below 60% for my recent shorts?",
    ),
    (
        "traffic",
        "Where is my traffic coming from in the **Last 7 Days**? Compare Shorts Feed vs YouTube Search. **CRITICAL: How many subscribers did I gain per 1,000 views (Subs Conversion Rate)?**",
    ),
    (
        "engagement",
        "Analyze the engagement on my channel. What is the Like-to-View ratio? What are the most common sentiments in the comments?",
    ),
    (
        "comments",
        "Summarize the top themes and questions in my recent comments. What are viewers asking for? Are there any recurring complaints or praise?",
    ),
];

pub fn lookup(category: &str) -> Option<&'static str> {
    ANALYTICS_PROMPTS
        .iter()
        .find(|(key, _)| *key == category)
        .map(|(_, prompt)| *prompt)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_has_seven_categories() {
        assert_eq!(ANALYTICS_PROMPTS.len(), 7);
        assert!(lookup("audience").unwrap().starts_with("Who is my audience?"));
        assert!(lookup("Audience").is_none());
    }
}
