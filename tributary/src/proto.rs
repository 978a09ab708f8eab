pub mod tributary {
    use self::{
        partition_assignment_request::Request as AssignmentRequest,
        publish_request::RequestType, seek_request::Target,
        streaming_commit_cursor_request::Request as CommitRequest,
        subscribe_request::Request as SubscribeRequestKind,
    };

    include!("./generated/tributary.rs");

    impl PublishRequest {
        pub fn initial(topic: String, partition: i64) -> Self {
            Self {
                request_type: Some(RequestType::InitialRequest(InitialPublishRequest {
                    topic,
                    partition,
                })),
            }
        }

        pub fn messages(messages: Vec<PubSubMessage>) -> Self {
            Self {
                request_type: Some(RequestType::MessagePublishRequest(MessagePublishRequest {
                    messages,
                })),
            }
        }
    }

    impl SeekRequest {
        pub fn to_offset(offset: i64) -> Self {
            Self {
                target: Some(Target::Cursor(Cursor { offset })),
            }
        }

        pub fn committed_cursor() -> Self {
            Self {
                target: Some(Target::NamedTarget(
                    seek_request::NamedTarget::CommittedCursor as i32,
                )),
            }
        }
    }

    impl SubscribeRequest {
        pub fn initial(subscription: String, partition: i64, location: SeekRequest) -> Self {
            Self {
                request: Some(SubscribeRequestKind::Initial(InitialSubscribeRequest {
                    subscription,
                    partition,
                    initial_location: Some(location),
                })),
            }
        }

        pub fn flow_control(request: FlowControlRequest) -> Self {
            Self {
                request: Some(SubscribeRequestKind::FlowControl(request)),
            }
        }
    }

    impl StreamingCommitCursorRequest {
        pub fn initial(subscription: String, partition: i64) -> Self {
            Self {
                request: Some(CommitRequest::Initial(InitialCommitCursorRequest {
                    subscription,
                    partition,
                })),
            }
        }

        pub fn commit(offset: i64) -> Self {
            Self {
                request: Some(CommitRequest::Commit(SequencedCommitCursorRequest {
                    cursor: Some(Cursor { offset }),
                })),
            }
        }
    }

    impl PartitionAssignmentRequest {
        pub fn initial(subscription: String, client_id: Vec<u8>) -> Self {
            Self {
                request: Some(AssignmentRequest::Initial(
                    InitialPartitionAssignmentRequest {
                        subscription,
                        client_id,
                    },
                )),
            }
        }

        pub fn ack() -> Self {
            Self {
                request: Some(AssignmentRequest::Ack(PartitionAssignmentAck {})),
            }
        }
    }

    impl SequencedMessage {
        /// The offset of this message, or `-1` if the server omitted it.
        pub fn offset(&self) -> i64 {
            self.cursor.as_ref().map(|c| c.offset).unwrap_or(-1)
        }
    }
}
