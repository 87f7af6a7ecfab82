//! Lifecycle rules shared by every storage backend.
//!
//! Stores call these inside their atomic units so that the check and the
//! mutation it guards happen under the same lock.

use super::errors::{TournamentError, TournamentResult};
use super::models::{
    Participant, ParticipantState, Standing, Tournament, TournamentDraft, TournamentStatus,
    TournamentType,
};
use crate::money::is_valid_amount;
use crate::wallet::UserId;
use chrono::{DateTime, Utc};
use std::cmp::Ordering;
use std::time::Duration;

/// Validate a creation request
pub fn check_draft(draft: &TournamentDraft) -> TournamentResult<()> {
    if !is_valid_amount(draft.entry_fee) {
        return Err(TournamentError::InvalidEntryFee);
    }
    if draft.min_participants < 2 {
        return Err(TournamentError::InvalidCapacity(
            "at least two participants are required".to_string(),
        ));
    }
    if draft.min_participants > draft.max_participants {
        return Err(TournamentError::InvalidCapacity(format!(
            "min_participants {} exceeds max_participants {}",
            draft.min_participants, draft.max_participants
        )));
    }
    if draft.tournament_type == TournamentType::Duel && draft.max_participants != 2 {
        return Err(TournamentError::InvalidCapacity(
            "a duel has exactly two participants".to_string(),
        ));
    }
    Ok(())
}

/// Admission preconditions, checked under the tournament lock
///
/// `existing` is the user's participant row, active or not. Filling the last
/// seat starts the tournament, so a full field is reported as
/// `TournamentFull` whether or not it has started.
pub fn check_admission(
    tournament: &Tournament,
    existing: Option<&Participant>,
) -> TournamentResult<()> {
    let live = !tournament.status.is_terminal();
    if live && existing.is_some_and(|p| p.is_active) {
        return Err(TournamentError::AlreadyJoined);
    }
    if live && tournament.is_full() {
        return Err(TournamentError::TournamentFull);
    }
    if tournament.status != TournamentStatus::Registration {
        return Err(TournamentError::NotOpenForRegistration(tournament.id));
    }
    Ok(())
}

/// Auto-start rule: enough active participants after an admission
pub fn should_auto_start(tournament: &Tournament) -> bool {
    tournament
        .status
        .can_transition_to(TournamentStatus::InProgress)
        && tournament.participant_count >= tournament.min_participants
}

/// Preconditions for leaving during registration
pub fn check_leave(
    tournament: &Tournament,
    user_id: UserId,
    participant: Option<&Participant>,
) -> TournamentResult<()> {
    if tournament.status != TournamentStatus::Registration {
        return Err(TournamentError::NotOpenForRegistration(tournament.id));
    }
    match participant {
        Some(p) if p.is_active => Ok(()),
        _ => Err(TournamentError::NotParticipant(user_id)),
    }
}

/// Preconditions for recording a trusted score
pub fn check_score_submission(
    tournament: &Tournament,
    user_id: UserId,
    participant: Option<&Participant>,
) -> TournamentResult<()> {
    if tournament.status != TournamentStatus::InProgress {
        return Err(TournamentError::NotInProgress(tournament.id));
    }
    let participant = match participant {
        Some(p) if p.is_active => p,
        _ => return Err(TournamentError::NotParticipant(user_id)),
    };
    match participant.state {
        ParticipantState::NotSubmitted => Ok(()),
        _ => Err(TournamentError::ScoreAlreadySubmitted),
    }
}

/// `true` when every active participant has a trusted score
pub fn all_scores_submitted(participants: &[Participant]) -> bool {
    let mut active = participants.iter().filter(|p| p.is_active).peekable();
    active.peek().is_some() && active.all(Participant::has_score)
}

/// Guard for every status write a store makes
pub fn check_transition(tournament: &Tournament, next: TournamentStatus) -> TournamentResult<()> {
    if tournament.status.can_transition_to(next) {
        return Ok(());
    }
    let expected = match next {
        TournamentStatus::Created | TournamentStatus::Registration => TournamentStatus::Created,
        TournamentStatus::InProgress | TournamentStatus::Cancelled => {
            TournamentStatus::Registration
        }
        TournamentStatus::Completed => TournamentStatus::InProgress,
    };
    Err(TournamentError::InvalidState {
        expected,
        actual: tournament.status,
    })
}

/// Cancellation is legal before the tournament starts
pub fn check_cancel(tournament: &Tournament) -> TournamentResult<()> {
    check_transition(tournament, TournamentStatus::Cancelled)
}

/// Whether a settlement lease taken at `claimed_at` still blocks other runs
pub fn lease_active(claimed_at: Option<DateTime<Utc>>, lease: Duration, now: DateTime<Utc>) -> bool {
    let Some(claimed_at) = claimed_at else {
        return false;
    };
    let lease = chrono::Duration::from_std(lease).unwrap_or(chrono::Duration::MAX);
    claimed_at
        .checked_add_signed(lease)
        .is_some_and(|expires| now < expires)
}

/// Rank active scored participants
///
/// Higher score first; ties go to the earlier `joined_at`, then the lower row id.
pub fn rank(tournament: &Tournament, participants: &[Participant]) -> Vec<Standing> {
    let mut scored: Vec<(&Participant, f64)> = participants
        .iter()
        .filter(|p| p.is_active)
        .filter_map(|p| p.state.score().map(|score| (p, score)))
        .collect();

    scored.sort_by(|(a, score_a), (b, score_b)| {
        score_b
            .partial_cmp(score_a)
            .unwrap_or(Ordering::Equal)
            .then_with(|| a.joined_at.cmp(&b.joined_at))
            .then_with(|| a.id.cmp(&b.id))
    });

    let finishers = scored.len() as u32;
    scored
        .into_iter()
        .enumerate()
        .map(|(index, (participant, score))| {
            let position = index as u32 + 1;
            Standing {
                user_id: participant.user_id,
                position,
                score,
                winnings: tournament.prize_distribution.payout_for(
                    position,
                    tournament.prize_pool,
                    finishers,
                ),
            }
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prize::PrizeDistribution;
    use crate::scoring::GameType;
    use chrono::TimeZone;
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    fn tournament(status: TournamentStatus, count: u32) -> Tournament {
        Tournament {
            id: 1,
            creator_id: 1,
            title: "Duel".to_string(),
            description: None,
            game_type: GameType::Clicker,
            tournament_type: TournamentType::Duel,
            entry_fee: dec!(100),
            max_participants: 2,
            min_participants: 2,
            prize_pool: dec!(160.00),
            platform_commission: dec!(40.00),
            prize_distribution: PrizeDistribution::standard(TournamentType::Duel),
            status,
            participant_count: count,
            created_at: Utc::now(),
            started_at: None,
            ended_at: None,
            settlement_claimed_at: None,
        }
    }

    fn participant(id: i64, user_id: UserId, joined_secs: i64, state: ParticipantState) -> Participant {
        Participant {
            id,
            tournament_id: 1,
            user_id,
            state,
            is_active: true,
            joined_at: Utc.timestamp_opt(1_700_000_000 + joined_secs, 0).unwrap(),
            left_at: None,
        }
    }

    #[test]
    fn test_admission_checks() {
        let open = tournament(TournamentStatus::Registration, 1);
        assert!(check_admission(&open, None).is_ok());

        let full = tournament(TournamentStatus::Registration, 2);
        assert!(matches!(
            check_admission(&full, None),
            Err(TournamentError::TournamentFull)
        ));

        let started_full = tournament(TournamentStatus::InProgress, 2);
        assert!(matches!(
            check_admission(&started_full, None),
            Err(TournamentError::TournamentFull)
        ));

        let started_with_seats = Tournament {
            max_participants: 3,
            ..tournament(TournamentStatus::InProgress, 2)
        };
        assert!(matches!(
            check_admission(&started_with_seats, None),
            Err(TournamentError::NotOpenForRegistration(1))
        ));

        let settled = tournament(TournamentStatus::Completed, 2);
        assert!(matches!(
            check_admission(&settled, None),
            Err(TournamentError::NotOpenForRegistration(1))
        ));

        let member = participant(1, 7, 0, ParticipantState::NotSubmitted);
        assert!(matches!(
            check_admission(&open, Some(&member)),
            Err(TournamentError::AlreadyJoined)
        ));

        let left = Participant {
            is_active: false,
            ..member
        };
        assert!(check_admission(&open, Some(&left)).is_ok());
    }

    #[test]
    fn test_draft_validation() {
        let mut draft = TournamentDraft::duel("Duel", GameType::Clicker, dec!(100));
        assert!(check_draft(&draft).is_ok());

        draft.max_participants = 3;
        assert!(matches!(
            check_draft(&draft),
            Err(TournamentError::InvalidCapacity(_))
        ));

        let free = TournamentDraft::duel("Duel", GameType::Clicker, Decimal::ZERO);
        assert!(matches!(
            check_draft(&free),
            Err(TournamentError::InvalidEntryFee)
        ));

        let mut group = TournamentDraft::group("Cup", GameType::Reaction, dec!(50), 8);
        group.min_participants = 9;
        assert!(check_draft(&group).is_err());
    }

    #[test]
    fn test_rank_ties_go_to_earlier_join() {
        let t = tournament(TournamentStatus::InProgress, 2);
        let participants = vec![
            participant(1, 10, 5, ParticipantState::Submitted { score: 40.0 }),
            participant(2, 20, 1, ParticipantState::Submitted { score: 40.0 }),
        ];
        let standings = rank(&t, &participants);
        assert_eq!(standings[0].user_id, 20);
        assert_eq!(standings[0].winnings, dec!(144.00));
        assert_eq!(standings[1].user_id, 10);
        assert_eq!(standings[1].winnings, Decimal::ZERO);
    }

    #[test]
    fn test_rank_orders_by_score() {
        let t = tournament(TournamentStatus::InProgress, 2);
        let participants = vec![
            participant(1, 10, 0, ParticipantState::Submitted { score: 30.0 }),
            participant(2, 20, 1, ParticipantState::Submitted { score: 50.0 }),
        ];
        let standings = rank(&t, &participants);
        assert_eq!(standings[0].user_id, 20);
        assert_eq!(standings[0].position, 1);
        assert_eq!(standings[1].position, 2);
    }

    #[test]
    fn test_all_scores_submitted_ignores_inactive() {
        let mut left = participant(3, 30, 2, ParticipantState::NotSubmitted);
        left.is_active = false;
        let participants = vec![
            participant(1, 10, 0, ParticipantState::Submitted { score: 1.0 }),
            left,
        ];
        assert!(all_scores_submitted(&participants));
        assert!(!all_scores_submitted(&[]));

        let waiting = vec![
            participant(1, 10, 0, ParticipantState::Submitted { score: 1.0 }),
            participant(2, 20, 1, ParticipantState::NotSubmitted),
        ];
        assert!(!all_scores_submitted(&waiting));
    }

    #[test]
    fn test_score_submission_checks() {
        let running = tournament(TournamentStatus::InProgress, 2);
        let fresh = participant(1, 10, 0, ParticipantState::NotSubmitted);
        assert!(check_score_submission(&running, 10, Some(&fresh)).is_ok());

        let scored = participant(1, 10, 0, ParticipantState::Submitted { score: 3.0 });
        assert!(matches!(
            check_score_submission(&running, 10, Some(&scored)),
            Err(TournamentError::ScoreAlreadySubmitted)
        ));
        assert!(matches!(
            check_score_submission(&running, 99, None),
            Err(TournamentError::NotParticipant(99))
        ));

        let open = tournament(TournamentStatus::Registration, 1);
        assert!(matches!(
            check_score_submission(&open, 10, Some(&fresh)),
            Err(TournamentError::NotInProgress(1))
        ));
    }

    #[test]
    fn test_lease() {
        let now = Utc::now();
        let lease = Duration::from_secs(60);
        assert!(!lease_active(None, lease, now));
        assert!(lease_active(Some(now), lease, now));
        assert!(!lease_active(
            Some(now - chrono::Duration::seconds(61)),
            lease,
            now
        ));
    }

    #[test]
    fn test_cancel_only_before_start() {
        assert!(check_cancel(&tournament(TournamentStatus::Registration, 1)).is_ok());
        assert!(check_cancel(&tournament(TournamentStatus::Created, 0)).is_ok());
        assert!(check_cancel(&tournament(TournamentStatus::InProgress, 2)).is_err());
        assert!(check_cancel(&tournament(TournamentStatus::Completed, 2)).is_err());
    }

    #[test]
    fn test_status_writes_follow_lifecycle() {
        let running = tournament(TournamentStatus::InProgress, 2);
        assert!(check_transition(&running, TournamentStatus::Completed).is_ok());
        assert!(matches!(
            check_transition(&running, TournamentStatus::Registration),
            Err(TournamentError::InvalidState {
                expected: TournamentStatus::Created,
                actual: TournamentStatus::InProgress,
            })
        ));

        let open = tournament(TournamentStatus::Registration, 1);
        assert!(matches!(
            check_transition(&open, TournamentStatus::Completed),
            Err(TournamentError::InvalidState {
                expected: TournamentStatus::InProgress,
                actual: TournamentStatus::Registration,
            })
        ));

        let cancelled = tournament(TournamentStatus::Cancelled, 0);
        assert!(check_transition(&cancelled, TournamentStatus::InProgress).is_err());
        assert!(!should_auto_start(&Tournament {
            participant_count: 2,
            ..cancelled
        }));
    }
}
