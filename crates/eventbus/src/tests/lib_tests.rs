use crate::Topic;

#[tokio::test]
async fn every_subscriber_receives_a_published_payload() {
    let topic = Topic::new(8);
    let mut first = topic.subscribe();
    let mut second = topic.subscribe();

    assert_eq!(topic.publish("hello".to_string()), 2);
    assert_eq!(first.next().await.as_deref(), Some("hello"));
    assert_eq!(second.next().await.as_deref(), Some("hello"));
}

#[tokio::test]
async fn publishes_are_not_replayed_to_later_subscribers() {
    let topic = Topic::new(8);
    assert_eq!(topic.publish(1u32), 0);

    let mut subscription = topic.subscribe();
    topic.publish(2u32);
    assert_eq!(subscription.next().await, Some(2));
}

#[tokio::test]
async fn retract_is_idempotent_and_stops_delivery() {
    let topic = Topic::new(8);
    let mut subscription = topic.subscribe();
    assert!(subscription.is_active());

    subscription.retract();
    subscription.retract();
    assert!(!subscription.is_active());
    assert_eq!(subscription.next().await, None::<u32>);
    assert_eq!(topic.publish(7u32), 0);
}

#[tokio::test]
async fn dropping_a_subscription_retracts_it() {
    let topic = Topic::<u32>::new(8);
    let subscription = topic.subscribe();
    assert_eq!(topic.subscriber_count(), 1);

    drop(subscription);
    assert_eq!(topic.subscriber_count(), 0);
    assert_eq!(topic.publish(7), 0);
}

#[tokio::test]
async fn topics_do_not_cross_deliver() {
    let numbers = Topic::<u32>::new(8);
    let words = Topic::<String>::new(8);
    let mut number_sub = numbers.subscribe();

    words.publish("unrelated".to_string());
    numbers.publish(42);
    assert_eq!(number_sub.next().await, Some(42));
}
