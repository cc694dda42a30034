//! Назначение номеров мест.
//!
//! Общая логика для Postgres и in-memory хранилищ: сначала проверяются
//! предпочтительные места пользователя, затем выдаются кандидаты (сначала
//! предпочтительные, иначе наименьший свободный номер). Хранилище пытается
//! вставить кандидата под уникальным индексом и сообщает результат через
//! `accept` / `reject`.

use std::collections::{BTreeSet, HashSet, VecDeque};

use crate::error::{AppError, AppResult};

/// Проверка входа до любых блокировок: N > 0, список предпочтений ровно из
/// N различных положительных номеров.
pub fn validate_request(count: i32, preferred: Option<&[i32]>) -> AppResult<()> {
    if count <= 0 {
        return Err(AppError::invalid("seat count must be positive"));
    }
    let Some(preferred) = preferred else {
        return Ok(());
    };
    if preferred.len() != count as usize {
        return Err(AppError::invalid(format!(
            "expected {} preferred seat numbers, got {}",
            count,
            preferred.len()
        )));
    }
    if let Some(bad) = preferred.iter().find(|n| **n <= 0) {
        return Err(AppError::invalid(format!("seat number {} is not positive", bad)));
    }
    let unique: HashSet<i32> = preferred.iter().copied().collect();
    if unique.len() != preferred.len() {
        return Err(AppError::invalid("preferred seat numbers contain duplicates"));
    }
    Ok(())
}

/// Наименьший номер в `1..=total`, которого нет в `taken`.
pub fn lowest_free_seat(taken: &BTreeSet<i32>, total: i32) -> Option<i32> {
    let mut expected = 1;
    for seat in taken.range(1..) {
        if *seat > expected {
            break;
        }
        if *seat == expected {
            expected += 1;
        }
    }
    (expected <= total).then_some(expected)
}

/// Первые `limit` свободных номеров по возрастанию.
pub fn free_seats(taken: &BTreeSet<i32>, total: i32, limit: usize) -> Vec<i32> {
    (1..=total)
        .filter(|seat| !taken.contains(seat))
        .take(limit)
        .collect()
}

#[derive(Debug)]
pub struct SeatPlanner {
    taken: BTreeSet<i32>,
    preferred: VecDeque<i32>,
    preferred_set: HashSet<i32>,
    wanted: usize,
    total: i32,
    assigned: Vec<i32>,
    attempts: u32,
    max_attempts: u32,
}

impl SeatPlanner {
    /// `taken`: номера со статусом booked на момент чтения под блокировкой события.
    ///
    /// Если хотя бы одно предпочтительное место уже занято, весь запрос
    /// отклоняется конфликтом с перечнем занятых мест; замены не делаем.
    pub fn new(
        taken: impl IntoIterator<Item = i32>,
        preferred: Option<&[i32]>,
        wanted: usize,
        total: i32,
        max_attempts: u32,
    ) -> AppResult<Self> {
        let taken: BTreeSet<i32> = taken.into_iter().collect();
        let preferred: Vec<i32> = preferred.map(<[i32]>::to_vec).unwrap_or_default();

        let occupied: Vec<i32> = preferred
            .iter()
            .copied()
            .filter(|seat| taken.contains(seat))
            .collect();
        if !occupied.is_empty() {
            return Err(AppError::seats_taken(occupied));
        }
        if let Some(outside) = preferred.iter().find(|seat| **seat > total) {
            return Err(AppError::invalid(format!(
                "seat {} is outside the event capacity of {}",
                outside, total
            )));
        }

        Ok(Self {
            taken,
            preferred_set: preferred.iter().copied().collect(),
            preferred: preferred.into(),
            wanted,
            total,
            assigned: Vec::with_capacity(wanted),
            attempts: 0,
            max_attempts,
        })
    }

    pub fn remaining(&self) -> usize {
        self.wanted.saturating_sub(self.assigned.len())
    }

    pub fn next_candidate(&mut self) -> AppResult<i32> {
        self.attempts += 1;
        if self.attempts > self.max_attempts {
            return Err(AppError::Transient(format!(
                "seat allocation gave up after {} attempts",
                self.max_attempts
            )));
        }
        if let Some(seat) = self.preferred.pop_front() {
            return Ok(seat);
        }
        lowest_free_seat(&self.taken, self.total).ok_or_else(|| {
            AppError::Transient("no free seat number within event capacity".into())
        })
    }

    pub fn accept(&mut self, seat: i32) {
        self.taken.insert(seat);
        self.assigned.push(seat);
    }

    /// Вставка упёрлась в уникальный индекс: место заняли параллельно.
    pub fn reject(&mut self, seat: i32) -> AppResult<()> {
        self.taken.insert(seat);
        if self.preferred_set.contains(&seat) {
            return Err(AppError::seats_taken(vec![seat]));
        }
        Ok(())
    }

    pub fn assigned(&self) -> &[i32] {
        &self.assigned
    }

    pub fn into_assigned(self) -> Vec<i32> {
        self.assigned
    }

    /// План без гонок (все кандидаты принимаются сразу).
    pub fn plan_all(mut self) -> AppResult<Vec<i32>> {
        while self.remaining() > 0 {
            let seat = self.next_candidate()?;
            self.accept(seat);
        }
        Ok(self.assigned)
    }
}
