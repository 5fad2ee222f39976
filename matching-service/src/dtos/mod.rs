pub mod matches;

pub use matches::{
    AutoMatchRequest, AutoMatchResponse, BatchApproveRequest, BatchApproveResponse,
    CandidateListResponse, CandidateResponse, CandidatesParams, ConfirmRequest, CreateGroupRequest,
    GroupResponse, ListParams, ManualMatchRequest, MatchListResponse, MatchResponse,
    ReceiptListResponse, ReceiptResponse, StatsResponse, TransactionListResponse,
    TransactionResponse, VendorAliasListResponse, VendorAliasResponse,
};
